//! Messaging gateway seam
//!
//! The bot core never talks to a transport directly; it sees this trait.
//! Adapters deliver inbound messages through the provided sender and take
//! outbound replies back.

use anyhow::Result;
use async_trait::async_trait;
use porter_core::{IncomingMessage, OutgoingMessage};
use tokio::sync::mpsc;

/// A messaging transport the bot can receive from and reply through.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Start listening for messages, forwarding them to `tx`. Spawns its own
    /// receive loop and returns once the transport is verified.
    async fn start(&self, tx: mpsc::Sender<IncomingMessage>) -> Result<()>;

    /// Deliver an outbound reply.
    async fn send(&self, msg: OutgoingMessage) -> Result<()>;

    /// Show a typing indicator in the given chat, where supported.
    async fn send_typing(&self, chat: i64) -> Result<()>;
}
