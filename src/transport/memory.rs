//! In-process duplex channel
//!
//! Both ends live in the same process. Used by tests and by tools that drive
//! the bus without spawning workers.

use super::{inbox, Inbox, InboxSender, Side, Transport};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One end of an in-memory pipe.
pub struct MemoryChannel {
    side: Side,
    peer: InboxSender,
    connected: Arc<AtomicBool>,
}

/// Create a connected parent/child pair, each with the inbox its peer writes to.
pub fn pair() -> ((MemoryChannel, Inbox), (MemoryChannel, Inbox)) {
    let (parent_tx, parent_inbox) = inbox();
    let (child_tx, child_inbox) = inbox();
    let connected = Arc::new(AtomicBool::new(true));

    let parent = MemoryChannel {
        side: Side::Parent,
        peer: child_tx,
        connected: connected.clone(),
    };
    let child = MemoryChannel {
        side: Side::Child,
        peer: parent_tx,
        connected,
    };

    ((parent, parent_inbox), (child, child_inbox))
}

impl MemoryChannel {
    /// Sever the pipe for both ends.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl Transport for MemoryChannel {
    fn side(&self) -> Side {
        self.side
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.peer.is_closed()
    }

    fn send(&self, message: &Value) -> bool {
        self.is_connected() && self.peer.send(message.clone()).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pair_delivers_both_ways() {
        let ((parent, mut parent_inbox), (child, mut child_inbox)) = pair();

        assert!(parent.send(&json!({ "scope": "shutdown" })));
        assert!(child.send(&json!({ "scope": "test", "isRunning": true })));

        assert_eq!(child_inbox.try_recv().unwrap()["scope"], "shutdown");
        assert_eq!(parent_inbox.try_recv().unwrap()["isRunning"], true);
    }

    #[test]
    fn test_disconnect_fails_sends() {
        let ((parent, _parent_inbox), (child, mut child_inbox)) = pair();
        child.disconnect();

        assert!(!parent.is_connected());
        assert!(!parent.send(&json!({ "scope": "shutdown" })));
        assert!(child_inbox.try_recv().is_err());
    }

    #[test]
    fn test_dropped_inbox_reads_as_disconnected() {
        let ((parent, _parent_inbox), (_child, child_inbox)) = pair();
        drop(child_inbox);

        assert!(!parent.is_connected());
        assert!(!parent.send(&json!({ "scope": "shutdown" })));
    }
}
