//! Shared plumbing behind [`crate::focus::FocusTracker`] and
//! [`crate::online::OnlineTracker`] (§4, §6). Both are "a boolean signal plus
//! subscriber fan-out" with an optional externally-supplied event source
//! (`set_event_listener`); only the polarity and the name differ, mirroring
//! how the source's `FocusManager`/`OnlineManager` share one shape.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

type Listener = Arc<dyn Fn(bool) + Send + Sync>;
type Listeners = Arc<Mutex<Vec<(u64, Listener)>>>;

/// `setup(on_change) -> teardown`, the collaborator contract of §6.
pub type EventSetup =
    Box<dyn FnOnce(Arc<dyn Fn(bool) + Send + Sync>) -> Option<Box<dyn FnOnce() + Send>> + Send>;

pub(crate) struct BoolTracker {
    value: AtomicBool,
    listeners: Listeners,
    next_id: AtomicU64,
    teardown: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

/// Guard returned by `subscribe`; dropping it unsubscribes.
#[must_use = "dropping this immediately unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Mutex<Vec<(u64, Listener)>>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

impl BoolTracker {
    pub(crate) fn new(initial: bool) -> Self {
        Self {
            value: AtomicBool::new(initial),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(0),
            teardown: Mutex::new(None),
        }
    }

    pub(crate) fn get(&self) -> bool {
        self.value.load(Ordering::Acquire)
    }

    /// Sets the value and, if it actually changed, fans out to every listener.
    pub(crate) fn set(&self, value: bool) {
        let changed = self.value.swap(value, Ordering::AcqRel) != value;
        if changed {
            let listeners: Vec<Listener> = self.listeners.lock().iter().map(|(_, l)| l.clone()).collect();
            for listener in listeners {
                listener(value);
            }
        }
    }

    pub(crate) fn subscribe(&self, listener: impl Fn(bool) + Send + Sync + 'static) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(listener)));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Replaces the external event source, tearing down the previous one if any.
    pub(crate) fn set_event_listener(self: &Arc<Self>, setup: EventSetup) {
        let this = Arc::clone(self);
        let on_change: Arc<dyn Fn(bool) + Send + Sync> = Arc::new(move |value| this.set(value));
        let teardown = setup(on_change);
        if let Some(previous) = self.teardown.lock().replace(teardown.unwrap_or_else(|| Box::new(|| {}))) {
            previous();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fans_out_only_on_change() {
        let tracker = Arc::new(BoolTracker::new(true));
        let calls = Arc::new(Mutex::new(Vec::new()));
        let calls2 = calls.clone();
        let _sub = tracker.subscribe(move |v| calls2.lock().push(v));

        tracker.set(true); // no change, no callback
        assert!(calls.lock().is_empty());

        tracker.set(false);
        assert_eq!(*calls.lock(), vec![false]);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let tracker = Arc::new(BoolTracker::new(false));
        let calls = Arc::new(Mutex::new(0usize));
        let calls2 = calls.clone();
        let sub = tracker.subscribe(move |_| *calls2.lock() += 1);
        drop(sub);
        tracker.set(true);
        assert_eq!(*calls.lock(), 0);
    }
}
