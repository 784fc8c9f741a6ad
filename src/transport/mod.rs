//! Channel transports
//!
//! A transport is the raw duplex pipe between a controller and one worker.
//! Outbound messages go through [`Transport::send`]; inbound messages are
//! pushed into an [`Inbox`] owned by whoever drives the message bus, so there
//! is no global "on message" slot.

pub mod memory;
pub mod stdio;

use serde_json::Value;
use tokio::sync::mpsc;

/// Delivery queue of raw inbound messages, drained in arrival order.
pub type Inbox = mpsc::UnboundedReceiver<Value>;

/// Producer half of an [`Inbox`]. Cloned into every reader feeding the queue.
pub type InboxSender = mpsc::UnboundedSender<Value>;

/// Create an empty delivery queue.
pub fn inbox() -> (InboxSender, Inbox) {
    mpsc::unbounded_channel()
}

/// Which end of the parent/child pipe a transport sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Controller end, talking to a spawned worker
    Parent,
    /// Worker end, talking to the controller that spawned it
    Child,
}

/// Outbound half of a channel.
pub trait Transport: Send + Sync {
    fn side(&self) -> Side;

    /// Whether the peer is still reachable.
    fn is_connected(&self) -> bool;

    /// Best-effort delivery. Returns the transport's acknowledgement, which
    /// only means the message was queued for the peer.
    fn send(&self, message: &Value) -> bool;
}
