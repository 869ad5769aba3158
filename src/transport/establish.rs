//! Connection Establisher (spec §4.2): turns a directive into a live,
//! connected stream, honoring retry-total/retry-wait/expiry budgets.

use std::net::{IpAddr, SocketAddr, SocketAddrV6};
use std::time::Instant;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;
use tracing::{debug, warn};

use super::url::Directive;
use crate::config::Timeouts;
use crate::error::TransportError;

/// Drives `directive` to a connected socket, or fails once the retry
/// budget is exhausted. `expiration_end` and `timeouts.retry_total` are
/// both checked; whichever fires first aborts the loop (spec §4.2, §8).
pub async fn establish(
    directive: &Directive,
    timeouts: &Timeouts,
    expiration_end: Instant,
) -> Result<(TcpStream, bool, SocketAddr), TransportError> {
    match directive {
        Directive::ReverseV4 { host, port } => {
            let addr_template = format!("{host}:{port}");
            let stream = reverse_connect(&addr_template, timeouts, expiration_end).await?;
            let peer = stream.peer_addr().map_err(TransportError::Connect)?;
            Ok((stream, false, peer))
        }
        Directive::ReverseV6 {
            host,
            service,
            scope_id,
        } => {
            let stream = reverse_connect_v6(host, service, *scope_id, timeouts, expiration_end)
                .await?;
            let peer = stream.peer_addr().map_err(TransportError::Connect)?;
            Ok((stream, false, peer))
        }
        Directive::BindV4 { port } => {
            let (stream, local) = bind_accept(*port).await?;
            Ok((stream, true, local))
        }
        Directive::Inherit { captured, bound } => {
            reconnect_from_captured(*captured, *bound, timeouts, expiration_end).await
        }
        Directive::FromStage => Err(TransportError::UrlParse(
            "FromStage directive must be probed before establishment".into(),
        )),
    }
}

/// Reverse (v4) connect loop: resolve, then retry `connect` until success,
/// expiry, or exhausted retry budget (spec §4.2, scenario 1).
async fn reverse_connect(
    addr_template: &str,
    timeouts: &Timeouts,
    expiration_end: Instant,
) -> Result<TcpStream, TransportError> {
    let start = Instant::now();
    loop {
        let addrs = tokio::net::lookup_host(addr_template)
            .await
            .map_err(TransportError::Resolve)?;
        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    stream.set_nodelay(true).ok();
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }

        if should_abort(start, timeouts, expiration_end) {
            return Err(match last_err {
                Some(e) => TransportError::Connect(e),
                None => TransportError::Timeout,
            });
        }
        debug!("reverse connect attempt failed, retrying after {:?}", timeouts.retry_wait);
        sleep(timeouts.retry_wait).await;
    }
}

/// Reverse (v6) connect loop: iterates all resolved addresses each round,
/// setting the scope id on each `SocketAddrV6` before connecting (spec
/// §4.2, scenario 3).
async fn reverse_connect_v6(
    host: &str,
    service: &str,
    scope_id: u32,
    timeouts: &Timeouts,
    expiration_end: Instant,
) -> Result<TcpStream, TransportError> {
    let start = Instant::now();
    loop {
        let candidates = tokio::net::lookup_host(format!("{host}:{service}"))
            .await
            .map_err(TransportError::Resolve)?;
        let mut last_err = None;
        for addr in candidates {
            let target = match addr {
                SocketAddr::V6(v6) => SocketAddr::V6(SocketAddrV6::new(
                    *v6.ip(),
                    v6.port(),
                    v6.flowinfo(),
                    scope_id,
                )),
                SocketAddr::V4(_) => continue,
            };
            match TcpStream::connect(target).await {
                Ok(stream) => {
                    stream.set_nodelay(true).ok();
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }

        if should_abort(start, timeouts, expiration_end) {
            return Err(match last_err {
                Some(e) => TransportError::Connect(e),
                None => TransportError::Timeout,
            });
        }
        sleep(timeouts.retry_wait).await;
    }
}

/// Bind flow: dual-stack v6 socket with `IPV6_V6ONLY` disabled, falling
/// back to a v4 `INADDR_ANY` socket when v6 creation or the option toggle
/// fails; `listen` with backlog 1, then a single blocking `accept` (spec
/// §4.2, scenario 2, and the boundary behavior "falls back to v4").
async fn bind_accept(port: u16) -> Result<(TcpStream, SocketAddr)> {
    let listener = match bind_dual_stack(port) {
        Ok(listener) => listener,
        Err(e) => {
            warn!("dual-stack bind failed ({e}), falling back to v4");
            bind_v4_any(port)?
        }
    };
    let local = listener.local_addr().map_err(TransportError::Bind)?;
    let (stream, _peer) = listener.accept().await.map_err(TransportError::Accept)?;
    drop(listener);
    stream.set_nodelay(true).ok();
    Ok((stream, local))
}

fn bind_dual_stack(port: u16) -> Result<TcpListener, TransportError> {
    use socket2::{Domain, Socket, Type};
    let socket = Socket::new(Domain::IPV6, Type::STREAM, None).map_err(TransportError::SocketInit)?;
    socket.set_only_v6(false).map_err(TransportError::SocketInit)?;
    let addr: SocketAddr = SocketAddr::new(IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED), port);
    socket.bind(&addr.into()).map_err(TransportError::Bind)?;
    socket.listen(1).map_err(TransportError::Listen)?;
    listener_from_socket(socket)
}

fn bind_v4_any(port: u16) -> Result<TcpListener, TransportError> {
    use socket2::{Domain, Socket, Type};
    let socket = Socket::new(Domain::IPV4, Type::STREAM, None).map_err(TransportError::SocketInit)?;
    let addr: SocketAddr = SocketAddr::new(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), port);
    socket.bind(&addr.into()).map_err(TransportError::Bind)?;
    socket.listen(1).map_err(TransportError::Listen)?;
    listener_from_socket(socket)
}

fn listener_from_socket(socket: socket2::Socket) -> Result<TcpListener, TransportError> {
    socket.set_nonblocking(true).map_err(TransportError::SocketInit)?;
    let owned_fd: std::os::fd::OwnedFd = socket.into();
    let std_listener = std::net::TcpListener::from(owned_fd);
    TcpListener::from_std(std_listener).map_err(TransportError::Bind)
}

/// Reconnect using a captured address: repeat the bind flow if the prior
/// connection was bound, otherwise drive the reverse-connect loop against
/// the captured peer address (spec §4.2 "Reconnect from captured address").
async fn reconnect_from_captured(
    captured: SocketAddr,
    bound: bool,
    timeouts: &Timeouts,
    expiration_end: Instant,
) -> Result<(TcpStream, bool, SocketAddr), TransportError> {
    if bound {
        let (stream, local) = bind_accept(captured.port()).await?;
        Ok((stream, true, local))
    } else {
        let start = Instant::now();
        loop {
            match TcpStream::connect(captured).await {
                Ok(stream) => {
                    stream.set_nodelay(true).ok();
                    return Ok((stream, false, captured));
                }
                Err(e) => {
                    if should_abort(start, timeouts, expiration_end) {
                        return Err(TransportError::Connect(e));
                    }
                    sleep(timeouts.retry_wait).await;
                }
            }
        }
    }
}

fn should_abort(start: Instant, timeouts: &Timeouts, expiration_end: Instant) -> bool {
    let now = Instant::now();
    now >= expiration_end || now.duration_since(start) >= timeouts.retry_total
}

type Result<T, E = TransportError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn generous_timeouts() -> Timeouts {
        Timeouts {
            retry_total: Duration::from_secs(5),
            retry_wait: Duration::from_secs(1),
            comms: Duration::from_secs(600),
            expiry: Duration::from_secs(600),
        }
    }

    /// Scenario 1: a reverse v4 connect to an already-listening peer
    /// succeeds within one iteration.
    #[tokio::test]
    async fn reverse_v4_connects_to_listening_peer_within_one_iteration() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept_task = tokio::spawn(async move { listener.accept().await.unwrap() });

        let timeouts = generous_timeouts();
        let directive = Directive::ReverseV4 {
            host: addr.ip().to_string(),
            port: addr.port(),
        };
        let expiration_end = Instant::now() + timeouts.retry_total;
        let (stream, bound, peer) = establish(&directive, &timeouts, expiration_end).await.unwrap();
        assert!(!bound);
        assert_eq!(peer, addr);
        drop(stream);
        accept_task.await.unwrap();
    }

    /// Scenario 2: binding on a port and accepting one connection returns
    /// the accepted socket with `bound = true`.
    #[tokio::test]
    async fn bind_accepts_one_connection_and_reports_bound() {
        let timeouts = generous_timeouts();

        let listener_port = {
            let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = probe.local_addr().unwrap().port();
            drop(probe);
            port
        };
        let directive = Directive::BindV4 { port: listener_port };
        let expiration_end = Instant::now() + timeouts.retry_total;
        let server = tokio::spawn(async move { establish(&directive, &timeouts, expiration_end).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let client = TcpStream::connect(("127.0.0.1", listener_port)).await.unwrap();

        let (_stream, bound, _local) = server.await.unwrap().unwrap();
        assert!(bound);
        drop(client);
    }

    /// Scenario 3: reverse v6 to loopback with scope id 0 succeeds.
    #[tokio::test]
    async fn reverse_v6_connects_with_scope_id_zero() {
        let listener = match TcpListener::bind("[::1]:0").await {
            Ok(l) => l,
            Err(_) => return, // host has no IPv6 loopback configured
        };
        let addr = listener.local_addr().unwrap();
        let accept_task = tokio::spawn(async move { listener.accept().await.unwrap() });

        let timeouts = generous_timeouts();
        let directive = Directive::ReverseV6 {
            host: "::1".into(),
            service: addr.port().to_string(),
            scope_id: 0,
        };
        let expiration_end = Instant::now() + timeouts.retry_total;
        let (stream, bound, peer) = establish(&directive, &timeouts, expiration_end).await.unwrap();
        assert!(!bound);
        assert_eq!(peer.port(), addr.port());
        drop(stream);
        accept_task.await.unwrap();
    }

    /// Boundary behavior: the retry loop aborts once `expiration_end`
    /// passes, even though `retry_total` has not yet elapsed.
    #[tokio::test]
    async fn retry_loop_aborts_on_expiration_before_retry_total() {
        let timeouts = Timeouts {
            retry_total: Duration::from_secs(600),
            retry_wait: Duration::from_millis(20),
            comms: Duration::from_secs(600),
            expiry: Duration::from_secs(600),
        };
        let directive = Directive::ReverseV4 {
            host: "127.0.0.1".into(),
            port: 1, // nothing listens on port 1 as an unprivileged user
        };
        let expiration_end = Instant::now() + Duration::from_millis(100);
        let result = establish(&directive, &timeouts, expiration_end).await;
        assert!(result.is_err());
    }
}
