//! Process message bus
//!
//! Multiplexes the four fixed scopes over one channel. Each process owns one
//! [`MessageBus`]; there is no global handler slot.
//!
//! Dispatch is synchronous and per-scope: every handler registered for the
//! envelope's scope runs in registration order. A panicking handler is logged
//! and skipped, its siblings still run.

mod envelope;
mod subscription;

pub use envelope::{BuildMessage, Envelope, Scope, ShutdownMessage, WorkerMessage};
pub use subscription::Subscription;

use crate::status::StatusUpdate;
use crate::transport::{Inbox, Side, Transport};
use serde_json::Value;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

type Handler<M> = Arc<dyn Fn(&M) + Send + Sync>;

/// Handlers of one scope, in registration order.
pub struct Handlers<M> {
    entries: Vec<(u64, Handler<M>)>,
}

impl<M> Default for Handlers<M> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

/// One handler registry per scope.
#[derive(Default)]
pub struct Registry {
    next_id: u64,
    worker: Handlers<WorkerMessage>,
    test: Handlers<StatusUpdate>,
    build: Handlers<BuildMessage>,
    shutdown: Handlers<ShutdownMessage>,
}

/// Payload type bound to exactly one scope.
pub trait ScopeMessage: Send + Sync + 'static {
    const SCOPE: Scope;

    fn into_envelope(self) -> Envelope;

    fn handlers(registry: &mut Registry) -> &mut Handlers<Self>
    where
        Self: Sized;
}

impl ScopeMessage for WorkerMessage {
    const SCOPE: Scope = Scope::Worker;

    fn into_envelope(self) -> Envelope {
        Envelope::Worker(self)
    }

    fn handlers(registry: &mut Registry) -> &mut Handlers<Self> {
        &mut registry.worker
    }
}

impl ScopeMessage for StatusUpdate {
    const SCOPE: Scope = Scope::Test;

    fn into_envelope(self) -> Envelope {
        Envelope::Test(self)
    }

    fn handlers(registry: &mut Registry) -> &mut Handlers<Self> {
        &mut registry.test
    }
}

impl ScopeMessage for BuildMessage {
    const SCOPE: Scope = Scope::Build;

    fn into_envelope(self) -> Envelope {
        Envelope::Build(self)
    }

    fn handlers(registry: &mut Registry) -> &mut Handlers<Self> {
        &mut registry.build
    }
}

impl ScopeMessage for ShutdownMessage {
    const SCOPE: Scope = Scope::Shutdown;

    fn into_envelope(self) -> Envelope {
        Envelope::Shutdown(self)
    }

    fn handlers(registry: &mut Registry) -> &mut Handlers<Self> {
        &mut registry.shutdown
    }
}

/// Send a tagged message over a specific transport.
///
/// Child-side transports are checked for a live peer first; a dead peer
/// yields `false` without touching the transport.
pub fn send_to<M: ScopeMessage>(target: &dyn Transport, message: M) -> bool {
    send_envelope_to(target, &message.into_envelope())
}

/// Untyped form of [`send_to`] for already-built envelopes.
pub fn send_envelope_to(target: &dyn Transport, envelope: &Envelope) -> bool {
    if target.side() == Side::Child && !target.is_connected() {
        log::debug!("peer disconnected, not sending {} message", envelope.scope());
        return false;
    }
    match envelope.to_value() {
        Some(value) => target.send(&value),
        None => false,
    }
}

/// Typed, scoped publish/subscribe over one channel.
pub struct MessageBus {
    transport: Option<Arc<dyn Transport>>,
    registry: Arc<Mutex<Registry>>,
}

impl MessageBus {
    /// Bus bound to the process's channel.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport: Some(transport),
            registry: Arc::default(),
        }
    }

    /// Bus with no channel. Sends are delivered to this bus's own subscribers.
    pub fn detached() -> Self {
        Self {
            transport: None,
            registry: Arc::default(),
        }
    }

    pub fn send<M: ScopeMessage>(&self, message: M) -> bool {
        self.send_envelope(message.into_envelope())
    }

    pub fn send_envelope(&self, envelope: Envelope) -> bool {
        match &self.transport {
            Some(transport) => send_envelope_to(transport.as_ref(), &envelope),
            None => {
                self.dispatch(&envelope);
                true
            }
        }
    }

    /// Register `handler` for `M`'s scope.
    pub fn subscribe<M, F>(&self, handler: F) -> Subscription
    where
        M: ScopeMessage,
        F: Fn(&M) + Send + Sync + 'static,
    {
        let id = {
            let mut registry = self.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            M::handlers(&mut registry).entries.push((id, Arc::new(handler)));
            id
        };
        log::trace!("subscribed handler {} to {}", id, M::SCOPE);

        let registry = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                let mut registry = registry.lock().unwrap_or_else(|e| e.into_inner());
                M::handlers(&mut registry)
                    .entries
                    .retain(|(entry, _)| *entry != id);
            }
        })
    }

    /// Number of handlers currently registered for `scope`.
    pub fn subscriber_count(&self, scope: Scope) -> usize {
        let registry = self.lock();
        match scope {
            Scope::Worker => registry.worker.entries.len(),
            Scope::Test => registry.test.entries.len(),
            Scope::Build => registry.build.entries.len(),
            Scope::Shutdown => registry.shutdown.entries.len(),
        }
    }

    /// Decode and dispatch one raw inbound message. Returns whether it was
    /// recognised.
    pub fn deliver(&self, raw: Value) -> bool {
        match Envelope::decode(raw) {
            Some(envelope) => {
                self.dispatch(&envelope);
                true
            }
            None => false,
        }
    }

    pub fn dispatch(&self, envelope: &Envelope) {
        match envelope {
            Envelope::Worker(message) => self.fire(message),
            Envelope::Test(message) => self.fire(message),
            Envelope::Build(message) => self.fire(message),
            Envelope::Shutdown(message) => self.fire(message),
        }
    }

    /// Drain `inbox` in arrival order until every producer is gone.
    pub async fn pump(&self, mut inbox: Inbox) {
        while let Some(raw) = inbox.recv().await {
            self.deliver(raw);
        }
        log::debug!("delivery queue closed");
    }

    fn fire<M: ScopeMessage>(&self, message: &M) {
        // Handlers run without the lock held so they can (un)subscribe.
        let handlers: Vec<Handler<M>> = {
            let mut registry = self.lock();
            M::handlers(&mut registry)
                .entries
                .iter()
                .map(|(_, handler)| handler.clone())
                .collect()
        };

        for handler in handlers {
            if panic::catch_unwind(AssertUnwindSafe(|| handler(message))).is_err() {
                log::error!("{} handler panicked, continuing dispatch", M::SCOPE);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }
}
