pub mod console;
pub mod replay;
pub mod worker;

use crate::bus::{send_to, Envelope, MessageBus, ScopeMessage, ShutdownMessage, WorkerMessage};
use crate::error::{Result, VistestError};
use crate::status::{RunStatus, StatusStore};
use crate::transport::stdio::StdioTransport;
use crate::transport::{inbox, Inbox, InboxSender, Transport};
use crate::utils::config::WORKER_ID_ENV;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::task::JoinHandle;

pub use console::ConsoleReporter;
pub use replay::replay_file;

/// A spawned worker process as seen by the controller.
pub struct WorkerHandle {
    pub id: usize,
    pub pid: Option<u32>,
    transport: Arc<StdioTransport>,
}

impl WorkerHandle {
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Send a message to this worker only.
    pub fn send<M: ScopeMessage>(&self, message: M) -> bool {
        send_to(self.transport.as_ref(), message)
    }
}

/// Asks every worker to stop. Cheap to clone into signal handlers.
#[derive(Clone)]
pub struct ShutdownHandle {
    workers: Vec<Arc<StdioTransport>>,
}

impl ShutdownHandle {
    /// Returns how many workers accepted the request. Workers whose output
    /// has already closed are skipped.
    pub fn request(&self) -> usize {
        self.workers
            .iter()
            .filter(|transport| transport.is_connected())
            .filter(|transport| send_to(transport.as_ref(), ShutdownMessage {}))
            .count()
    }
}

/// Controller side of a run.
///
/// Every worker's inbound messages, plus the lifecycle events the controller
/// observes itself, go through one delivery queue that a single loop drains,
/// so the status store never merges two updates at once.
pub struct Controller {
    bus: Arc<MessageBus>,
    store: Arc<StatusStore>,
    workers: Vec<WorkerHandle>,
    inbox_tx: InboxSender,
    inbox: Inbox,
    monitors: Vec<JoinHandle<()>>,
}

impl Controller {
    pub fn new() -> Self {
        let bus = Arc::new(MessageBus::detached());
        let store = StatusStore::attach(&bus);
        let (inbox_tx, inbox) = inbox();
        Self {
            bus,
            store,
            workers: Vec::new(),
            inbox_tx,
            inbox,
            monitors: Vec::new(),
        }
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn store(&self) -> &Arc<StatusStore> {
        &self.store
    }

    pub fn workers(&self) -> &[WorkerHandle] {
        &self.workers
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            workers: self.workers.iter().map(|w| w.transport.clone()).collect(),
        }
    }

    /// Spawn `count` copies of `command`, each with its slot index in
    /// [`WORKER_ID_ENV`].
    pub fn spawn_workers(&mut self, command: &[String], count: usize) -> Result<()> {
        for _ in 0..count {
            self.spawn_worker(command)?;
        }
        Ok(())
    }

    pub fn spawn_worker(&mut self, command: &[String]) -> Result<&WorkerHandle> {
        let (program, args) = command.split_first().ok_or(VistestError::EmptyCommand)?;
        let id = self.workers.len();

        let mut child = Command::new(program)
            .args(args)
            .env(WORKER_ID_ENV, id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| VistestError::Spawn {
                command: command.join(" "),
                source,
            })?;

        let pid = child.id();
        log::info!("spawned worker {} (pid {:?})", id, pid);
        enqueue(&self.inbox_tx, WorkerMessage::Spawned { worker_id: id, pid });

        let (transport, reader) = StdioTransport::attach_child(&mut child, self.inbox_tx.clone())
            .ok_or(VistestError::MissingPipe(id, "stdio"))?;

        let tx = self.inbox_tx.clone();
        self.monitors.push(tokio::spawn(async move {
            let _ = reader.await;
            let message = match child.wait().await {
                Ok(status) if status.success() || status.code().is_none() => {
                    WorkerMessage::Exited {
                        worker_id: id,
                        code: status.code(),
                    }
                }
                Ok(status) => WorkerMessage::Crashed {
                    worker_id: id,
                    reason: format!("exited with {}", status),
                },
                Err(e) => WorkerMessage::Crashed {
                    worker_id: id,
                    reason: e.to_string(),
                },
            };
            enqueue(&tx, message);
        }));

        self.workers.push(WorkerHandle {
            id,
            pid,
            transport: Arc::new(transport),
        });
        Ok(&self.workers[id])
    }

    /// Ask every worker to stop. Returns how many accepted the request.
    pub fn shutdown(&self) -> usize {
        self.shutdown_handle().request()
    }

    /// Dispatch inbound messages until every worker has exited, then return
    /// the final status.
    pub async fn run(self) -> Arc<RunStatus> {
        let Controller {
            bus,
            store,
            workers,
            inbox_tx,
            inbox,
            monitors,
        } = self;

        // The queue closes once the readers and monitors drop their senders.
        drop(inbox_tx);
        bus.pump(inbox).await;

        for monitor in monitors {
            let _ = monitor.await;
        }
        drop(workers);
        store.current()
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

/// Put a locally observed event on the delivery queue.
fn enqueue<M: ScopeMessage>(tx: &InboxSender, message: M) {
    let envelope: Envelope = message.into_envelope();
    if let Some(value) = envelope.to_value() {
        let _ = tx.send(value);
    }
}
