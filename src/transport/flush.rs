//! Socket Flusher (spec §4.4): drains any bytes left in the stream's read
//! buffer from a previous session before the new one starts dispatching,
//! so stale leftover traffic from e.g. a half-delivered TLS record does not
//! get misparsed as the start of the next frame.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};

/// How long to wait for the next byte before concluding the stream is
/// quiet and flushing is done (spec §4.4: "exit on timeout (no data for 1
/// second)").
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Reads and discards bytes until a read would block for longer than
/// `DRAIN_TIMEOUT`, or the stream reports EOF. Errors are swallowed: a
/// flush failure should not stop the caller from proceeding with the TLS
/// handshake, since the worst case is a corrupt frame that the codec will
/// itself reject. Runs before TLS negotiation (spec §4.4, scenario 4).
pub async fn drain<S>(stream: &mut S)
where
    S: AsyncRead + Unpin,
{
    let mut scratch = [0u8; 4096];
    loop {
        match tokio::time::timeout(DRAIN_TIMEOUT, stream.read(&mut scratch)).await {
            Ok(Ok(0)) => return,
            Ok(Ok(_)) => continue,
            Ok(Err(_)) | Err(_) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    /// Scenario 4: 16 bytes buffered on the stream before TLS are fully
    /// drained before the caller proceeds.
    #[tokio::test]
    async fn drains_bytes_buffered_before_tls_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept_task = tokio::spawn(async move { listener.accept().await.unwrap().0 });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut server = accept_task.await.unwrap();

        let buffered: &[u8] = &[0x00, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x01, b'A', b'B', b'C', b'D', b'E', b'F', b'G', b'H'];
        tokio::io::AsyncWriteExt::write_all(&mut client, buffered).await.unwrap();

        drain(&mut server).await;

        // nothing left to read without the client sending more
        let mut probe = [0u8; 1];
        let result = tokio::time::timeout(Duration::from_millis(50), server.read(&mut probe)).await;
        assert!(result.is_err(), "expected no further data after drain");
    }
}
