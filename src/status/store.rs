use super::merge::merge;
use super::types::{RunStatus, StatusUpdate};
use crate::bus::{MessageBus, Subscription};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

type Observer = Arc<dyn Fn(&Arc<RunStatus>) + Send + Sync>;

/// Owner of the live run status.
///
/// Readers get immutable snapshots; every applied update replaces the
/// snapshot in one swap and then notifies observers, so an observer calling
/// [`StatusStore::current`] sees the state it was notified about.
pub struct StatusStore {
    state: Mutex<Arc<RunStatus>>,
    observers: Arc<Mutex<Vec<(u64, Observer)>>>,
    next_observer: AtomicU64,
    bus_subscription: Mutex<Option<Subscription>>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::with_initial(RunStatus::default())
    }

    /// Start from a status fetched elsewhere, e.g. the controller's snapshot
    /// when a UI connects mid-run.
    pub fn with_initial(status: RunStatus) -> Self {
        Self {
            state: Mutex::new(Arc::new(status)),
            observers: Arc::default(),
            next_observer: AtomicU64::new(0),
            bus_subscription: Mutex::new(None),
        }
    }

    /// Create a store fed by `bus`'s `test` scope.
    pub fn attach(bus: &MessageBus) -> Arc<Self> {
        let store = Arc::new(Self::new());
        store.listen(bus);
        store
    }

    /// Subscribe this store to `bus`'s `test` scope, replacing any earlier
    /// subscription.
    pub fn listen(self: &Arc<Self>, bus: &MessageBus) {
        let weak = Arc::downgrade(self);
        let subscription = bus.subscribe(move |update: &StatusUpdate| {
            if let Some(store) = weak.upgrade() {
                store.apply(update);
            }
        });
        let previous = self
            .bus_subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(subscription);
        if let Some(previous) = previous {
            previous.unsubscribe();
        }
    }

    /// Stop receiving updates from the bus.
    pub fn detach(&self) {
        let subscription = self
            .bus_subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
    }

    pub fn current(&self) -> Arc<RunStatus> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Merge `update` into the current status, publish, notify.
    pub fn apply(&self, update: &StatusUpdate) -> Arc<RunStatus> {
        let next = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let next = Arc::new(merge(&state, update));
            *state = next.clone();
            next
        };
        self.notify(&next);
        next
    }

    /// Swap in a complete status, e.g. after reconnecting.
    pub fn replace(&self, status: RunStatus) {
        let next = Arc::new(status);
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next.clone();
        self.notify(&next);
    }

    pub fn on_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Arc<RunStatus>) + Send + Sync + 'static,
    {
        let id = self.next_observer.fetch_add(1, Ordering::Relaxed);
        self.observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));

        let observers = Arc::downgrade(&self.observers);
        Subscription::new(move || {
            if let Some(observers) = observers.upgrade() {
                observers
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .retain(|(entry, _)| *entry != id);
            }
        })
    }

    fn notify(&self, status: &Arc<RunStatus>) {
        let observers: Vec<Observer> = self
            .observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();

        for observer in observers {
            if panic::catch_unwind(AssertUnwindSafe(|| observer(status))).is_err() {
                log::error!("status observer panicked");
            }
        }
    }
}

impl Default for StatusStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::types::{Test, TestStatus, TestUpdate};
    use std::sync::atomic::AtomicUsize;

    fn running(id: &str) -> StatusUpdate {
        StatusUpdate::default().with_test(
            id,
            TestUpdate {
                status: Some(TestStatus::Running),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_observer_sees_new_state_through_current() {
        let store = Arc::new(StatusStore::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let reader = store.clone();
        let sink = seen.clone();
        let _sub = store.on_change(move |notified| {
            let current = reader.current();
            assert!(Arc::ptr_eq(&current, notified));
            sink.lock().unwrap().push(current.tests.len());
        });

        store.apply(&running("t1"));
        store.apply(&running("t2"));
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_snapshots_are_not_affected_by_later_updates() {
        let store = StatusStore::new();
        store.apply(&running("t1"));
        let snapshot = store.current();

        store.apply(&StatusUpdate::default().with_running(true));
        store.apply(
            &StatusUpdate::default().with_test(
                "t1",
                TestUpdate {
                    status: Some(TestStatus::Success),
                    ..Default::default()
                },
            ),
        );

        assert_eq!(snapshot.tests.get("t1").unwrap().status, Some(TestStatus::Running));
        assert_eq!(store.current().tests.get("t1").unwrap().status, Some(TestStatus::Success));
    }

    #[test]
    fn test_attached_store_follows_bus() {
        let bus = MessageBus::detached();
        let store = StatusStore::attach(&bus);

        bus.send(running("t1").with_running(true));
        let status = store.current();
        assert!(status.is_running);
        assert!(status.tests.contains("t1"));

        store.detach();
        bus.send(running("t2"));
        assert!(!store.current().tests.contains("t2"));
        assert_eq!(bus.subscriber_count(crate::bus::Scope::Test), 0);
    }

    #[test]
    fn test_replace_and_unsubscribe() {
        let store = StatusStore::with_initial(RunStatus {
            is_running: true,
            ..Default::default()
        });
        assert!(store.current().is_running);

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sub = store.on_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut status = RunStatus::default();
        status.tests.insert(Test::new("t9", vec!["Z".to_string()]));
        store.replace(status);
        sub.unsubscribe();
        store.apply(&running("t1"));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!store.current().is_running);
        assert_eq!(store.current().tests.len(), 2);
    }

    #[test]
    fn test_panicking_observer_does_not_stop_others() {
        let store = StatusStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let _bad = store.on_change(|_| panic!("observer failure"));
        let _good = store.on_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.apply(&running("t1"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(store.current().tests.contains("t1"));
    }
}
