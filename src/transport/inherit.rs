//! Inheritance Prober (spec §4.3): when no URL matches and no address was
//! captured from a prior session, a raw inherited socket handle must be
//! identified among a window of sibling file descriptors before it can be
//! used as the transport's stream.

#![cfg(unix)]

use std::mem::ManuallyDrop;
use std::net::SocketAddr;
use std::os::unix::io::{FromRawFd, RawFd};

use socket2::Socket;

use crate::error::TransportError;

/// Handle spacing between a process's inherited socket and the listening
/// socket it was `accept`-ed from; platform-specific and, like the
/// teacher's raw socket-option lookups, accessed through `socket2` rather
/// than hand-rolled FFI.
const HANDLE_SPACING: RawFd = 4;
/// Number of candidate descriptors to scan below `sock` before giving up.
const PROBE_WINDOW: RawFd = 16;

/// Outcome of probing the descriptors around `sock` for the listen socket
/// it was accepted from.
pub struct Probed {
    pub bound: bool,
    pub local: SocketAddr,
}

/// Scan a window of candidate sibling handles, each a multiple of
/// `HANDLE_SPACING` below `sock`, looking for the listening socket `sock`
/// was accepted from. A match means the prior session bound and accepted;
/// absent one, fall back to `sock`'s own peer address.
///
/// # Safety
///
/// `sock` and every candidate descriptor in the probe window must be a
/// valid, open file descriptor for the duration of this call; ownership of
/// `sock` stays with the caller (each `Socket` built here is probed via a
/// borrowed duplicate and never closes the original descriptor it wraps
/// unless it is itself the match).
pub unsafe fn probe(sock: RawFd) -> Result<Probed, TransportError> {
    let accepted = borrow(sock)?;
    let accepted_local = accepted.local_addr().ok().and_then(|a| a.as_socket());

    for step in 1..=PROBE_WINDOW {
        let candidate_fd = sock - step * HANDLE_SPACING;
        if candidate_fd < 0 {
            break;
        }
        let candidate = borrow(candidate_fd)?;
        if !candidate.is_listener().unwrap_or(false) {
            continue;
        }
        let Some(listen_addr) = candidate.local_addr().ok().and_then(|a| a.as_socket()) else {
            continue;
        };
        let Some(accepted_local) = accepted_local else {
            continue;
        };
        if listen_addr.is_ipv4() != accepted_local.is_ipv4() {
            continue;
        }
        if listen_addr.port() != accepted_local.port() {
            continue;
        }
        // The prior stage leaked the listen socket after accepting; this
        // process owns it now, so close it (ManuallyDrop normally suppresses
        // that).
        drop(ManuallyDrop::into_inner(candidate));
        return Ok(Probed {
            bound: true,
            local: listen_addr,
        });
    }

    let peer = accepted
        .peer_addr()
        .ok()
        .and_then(|a| a.as_socket())
        .ok_or_else(|| TransportError::SocketInit(std::io::Error::from_raw_os_error(libc::ENOTCONN)))?;
    Ok(Probed {
        bound: false,
        local: peer,
    })
}

/// Wraps `fd` in a `Socket` without taking ownership: `ManuallyDrop`
/// suppresses the close that dropping a `Socket` would otherwise perform,
/// since the descriptor belongs to the process's inherited handle table,
/// not to this probe.
fn borrow(fd: RawFd) -> Result<ManuallyDrop<Socket>, TransportError> {
    Ok(ManuallyDrop::new(unsafe { Socket::from_raw_fd(fd) }))
}
