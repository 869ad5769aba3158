//! Crate-wide error type for the transport subsystem.

use std::io;
use thiserror::Error;

use crate::crypto::CryptoError;

/// Errors surfaced by connection establishment, TLS negotiation, framing,
/// and the dispatch loop.
///
/// This enumerates the error kinds from the transport's design: socket
/// initialization, name resolution, the four establishment syscalls,
/// timeout/expiry, handshake failure, short frames, and cipher failures.
/// There is no `Allocation` variant: the global allocator aborts the
/// process on allocation failure rather than returning a `Result`, so no
/// catchable path exists for it here.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket library could not be initialized: {0}")]
    SocketInit(#[source] io::Error),

    #[error("name resolution failed: {0}")]
    Resolve(#[source] io::Error),

    #[error("connect failed: {0}")]
    Connect(#[source] io::Error),

    #[error("bind failed: {0}")]
    Bind(#[source] io::Error),

    #[error("listen failed: {0}")]
    Listen(#[source] io::Error),

    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    #[error("retry budget exhausted before establishment succeeded")]
    Timeout,

    #[error("TLS handshake did not complete: {0}")]
    HandshakeFailed(String),

    #[error("stream closed before a full frame was received")]
    FrameShort,

    #[error("cipher operation failed: {0}")]
    Crypto(#[from] CryptoError),

    #[error("malformed transport URL: {0}")]
    UrlParse(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}
