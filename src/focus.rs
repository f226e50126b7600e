//! Window/app focus tracking (§4, §6). Assumed focused until told otherwise —
//! a headless process has no window manager to ask, so callers that care wire
//! up a real event source with [`FocusTracker::set_event_listener`].

use std::sync::Arc;

use crate::tracker::{BoolTracker, EventSetup, Subscription};

pub struct FocusTracker {
    inner: Arc<BoolTracker>,
}

impl Default for FocusTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl FocusTracker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BoolTracker::new(true)),
        }
    }

    pub fn is_focused(&self) -> bool {
        self.inner.get()
    }

    pub fn set_focused(&self, focused: bool) {
        self.inner.set(focused);
    }

    pub fn subscribe(&self, listener: impl Fn(bool) + Send + Sync + 'static) -> Subscription {
        self.inner.subscribe(listener)
    }

    /// Supplies an OS/runtime-specific event source; `setup` receives a
    /// callback to invoke on every focus change and may return a teardown.
    pub fn set_event_listener(&self, setup: EventSetup) {
        self.inner.set_event_listener(setup);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_focused() {
        assert!(FocusTracker::new().is_focused());
    }

    #[test]
    fn notifies_subscribers_on_change() {
        let tracker = FocusTracker::new();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let _sub = tracker.subscribe(move |v| seen2.lock().unwrap().push(v));
        tracker.set_focused(false);
        assert_eq!(*seen.lock().unwrap(), vec![false]);
    }
}
