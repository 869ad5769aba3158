//! The transport subsystem (spec §2): a bidirectional, session-framed,
//! length-prefixed, optionally-encrypted control channel over TCP/TLS.

pub mod codec;
pub mod context;
pub mod establish;
pub mod flush;
#[cfg(unix)]
pub mod inherit;
pub mod packet;
pub mod session;
pub mod tls;
pub mod url;

pub use context::TransportContext;
pub use packet::{Packet, PacketKind};
pub use session::{DispatchHandle, Session};
pub use url::Directive;
