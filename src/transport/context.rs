//! TCP Transport Context (spec §3): the stream, captured address, and
//! `bound` flag that together let the Establisher reconnect in the same
//! shape after a failure.

use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

/// The live I/O handle: a raw TCP stream before TLS negotiation, or a
/// TLS-wrapped stream afterwards. Grounded directly in the teacher's
/// `transport::io_stream::IoStream`, generalized to the client-side TLS
/// stream type this transport always negotiates (spec §4.5: the TLS
/// session is always client-initiated, regardless of which side initiated
/// the underlying TCP connection).
pub enum IoStream {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl From<TcpStream> for IoStream {
    fn from(stream: TcpStream) -> Self {
        IoStream::Tcp(stream)
    }
}

impl From<TlsStream<TcpStream>> for IoStream {
    fn from(stream: TlsStream<TcpStream>) -> Self {
        IoStream::Tls(Box::new(stream))
    }
}

impl AsyncRead for IoStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            IoStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            IoStream::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl IoStream {
    /// Waits for the underlying socket to be readable without consuming any
    /// bytes (spec §4.7 step 2: "poll the stream with a 50 ms timeout", kept
    /// separate from step 3's unbounded read so the codec's accumulate loop
    /// is never interrupted mid-frame).
    pub async fn readable(&self) -> std::io::Result<()> {
        match self {
            IoStream::Tcp(s) => s.readable().await,
            IoStream::Tls(s) => s.get_ref().0.readable().await,
        }
    }
}

impl AsyncWrite for IoStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            IoStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            IoStream::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            IoStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            IoStream::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            IoStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            IoStream::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Owns the live stream and the state needed to reconnect in the same
/// shape. Invariant (spec §3): when `bound` is true, `captured` is a local
/// listen address; when false, it is a remote peer address.
pub struct TransportContext {
    pub(crate) io: Option<IoStream>,
    pub(crate) captured: Option<SocketAddr>,
    pub(crate) bound: bool,
}

impl TransportContext {
    pub fn empty() -> Self {
        Self {
            io: None,
            captured: None,
            bound: false,
        }
    }

    /// Closes the current stream and zeros the handle but preserves the
    /// captured address, so the Establisher can reconnect (spec §4.8).
    pub fn reset(&mut self) {
        self.io = None;
    }

    pub fn is_live(&self) -> bool {
        self.io.is_some()
    }

    pub fn captured_address(&self) -> Option<SocketAddr> {
        self.captured
    }

    pub fn bound(&self) -> bool {
        self.bound
    }
}
