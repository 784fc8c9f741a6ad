//! Worker end of a run
//!
//! A worker talks to its controller over its own stdin/stdout. It reacts to
//! `shutdown` by finishing the message in flight and stopping.

use super::replay::read_messages;
use crate::bus::{Envelope, MessageBus, ScopeMessage, ShutdownMessage, Subscription};
use crate::error::Result;
use crate::transport::stdio::StdioTransport;
use crate::transport::{inbox, Inbox, Transport};
use crate::utils::config::WORKER_ID_ENV;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct WorkerChannel {
    bus: Arc<MessageBus>,
    stdio: Option<Arc<StdioTransport>>,
    worker_id: Option<usize>,
    stop: Arc<AtomicBool>,
    shutdown: Subscription,
    pump: JoinHandle<()>,
}

impl WorkerChannel {
    /// Connect to the controller that spawned this process.
    pub fn connect() -> Self {
        let (tx, inbox) = inbox();
        let (transport, _reader) = StdioTransport::current_process(tx);
        let transport = Arc::new(transport);
        let mut channel = Self::over(transport.clone(), inbox);
        channel.stdio = Some(transport);
        channel
    }

    /// Run the worker end over any transport. Must be called inside a tokio
    /// runtime; inbound messages are pumped by a background task.
    pub fn over(transport: Arc<dyn Transport>, inbox: Inbox) -> Self {
        let bus = Arc::new(MessageBus::new(transport));

        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let shutdown = bus.subscribe(move |_: &ShutdownMessage| {
            log::info!("shutdown requested by controller");
            flag.store(true, Ordering::SeqCst);
        });

        let pump_bus = bus.clone();
        let pump = tokio::spawn(async move { pump_bus.pump(inbox).await });

        let worker_id = std::env::var(WORKER_ID_ENV)
            .ok()
            .and_then(|id| id.parse().ok());

        Self {
            bus,
            stdio: None,
            worker_id,
            stop,
            shutdown,
            pump,
        }
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn worker_id(&self) -> Option<usize> {
        self.worker_id
    }

    pub fn shutdown_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn send<M: ScopeMessage>(&self, message: M) -> bool {
        self.bus.send(message)
    }

    /// Wait until everything sent so far has reached the pipe. Call before
    /// the worker process exits.
    pub async fn flush(&self) {
        if let Some(stdio) = &self.stdio {
            stdio.flush().await;
        }
    }

    /// Send the messages of a recording to the controller, stopping early on
    /// shutdown or disconnect. Returns how many were sent.
    pub async fn emit_file(&self, path: &Path, delay: Duration) -> Result<usize> {
        let mut sent = 0;
        for (index, raw) in read_messages(path)?.into_iter().enumerate() {
            if self.shutdown_requested() {
                log::info!("stopping after {} message(s)", sent);
                break;
            }
            let Some(envelope) = Envelope::decode(raw) else {
                log::warn!("skipping message {}: not a known envelope", index + 1);
                continue;
            };
            if !self.bus.send_envelope(envelope) {
                log::warn!("controller disconnected after {} message(s)", sent);
                break;
            }
            sent += 1;

            if delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(delay).await;
            }
        }
        Ok(sent)
    }
}

impl Drop for WorkerChannel {
    fn drop(&mut self) {
        self.shutdown.unsubscribe();
        self.pump.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::send_to;
    use crate::transport::memory;
    use std::io::Write;

    fn recording() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"scope":"build","type":"success"}}"#).unwrap();
        writeln!(file, r#"{{"scope":"unknown"}}"#).unwrap();
        writeln!(file, r#"{{"scope":"test","tests":{{"t1":{{"status":"running"}}}}}}"#).unwrap();
        file
    }

    #[tokio::test]
    async fn test_emit_forwards_known_envelopes() {
        let ((_parent, mut parent_inbox), (child, child_inbox)) = memory::pair();
        let channel = WorkerChannel::over(Arc::new(child), child_inbox);
        let file = recording();

        let sent = channel.emit_file(file.path(), Duration::ZERO).await.unwrap();
        assert_eq!(sent, 2);
        assert_eq!(parent_inbox.recv().await.unwrap()["scope"], "build");
        assert_eq!(parent_inbox.recv().await.unwrap()["scope"], "test");
    }

    #[tokio::test]
    async fn test_emit_stops_on_shutdown() {
        let ((parent, _parent_inbox), (child, child_inbox)) = memory::pair();
        let channel = WorkerChannel::over(Arc::new(child), child_inbox);

        assert!(send_to(&parent, ShutdownMessage {}));
        while !channel.shutdown_requested() {
            tokio::task::yield_now().await;
        }

        let sent = channel.emit_file(recording().path(), Duration::ZERO).await.unwrap();
        assert_eq!(sent, 0);
    }

    #[tokio::test]
    async fn test_emit_stops_when_controller_is_gone() {
        let ((parent, _parent_inbox), (child, child_inbox)) = memory::pair();
        parent.disconnect();
        let channel = WorkerChannel::over(Arc::new(child), child_inbox);

        let sent = channel.emit_file(recording().path(), Duration::ZERO).await.unwrap();
        assert_eq!(sent, 0);
    }
}
