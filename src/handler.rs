//! Command Handler collaborator (spec §6): decodes and acts on a received
//! packet, and tells the dispatch loop whether to keep going.
//!
//! `async_trait` is already a teacher dependency, used there for
//! `Interaction`-style per-connection callback traits; it plays the same
//! role here.

use async_trait::async_trait;

use crate::transport::packet::Packet;
use crate::transport::session::DispatchHandle;

#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Handle one decoded packet. `handle` gives access to `transmit` (for
    /// replies) and `spawn` (for longer-running worker tasks); returns
    /// `false` to ask the dispatch loop to terminate, `true` to keep
    /// dispatching (spec §4.7, step 3; §5's worker-task model).
    async fn handle(&self, handle: &DispatchHandle, packet: &Packet) -> bool;
}

/// A handler that always continues, useful for tests and as a default when
/// no real command set has been wired in yet.
pub struct EchoHandler;

#[async_trait]
impl CommandHandler for EchoHandler {
    async fn handle(&self, _handle: &DispatchHandle, packet: &Packet) -> bool {
        tracing::debug!(kind = packet.kind.0, "received packet");
        true
    }
}
