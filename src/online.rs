//! Network-connectivity tracking (§4, §6). Assumed online until told
//! otherwise, mirroring [`crate::focus::FocusTracker`]'s default.

use std::sync::Arc;

use crate::tracker::{BoolTracker, EventSetup, Subscription};

pub struct OnlineTracker {
    inner: Arc<BoolTracker>,
}

impl Default for OnlineTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl OnlineTracker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BoolTracker::new(true)),
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner.get()
    }

    pub fn set_online(&self, online: bool) {
        self.inner.set(online);
    }

    pub fn subscribe(&self, listener: impl Fn(bool) + Send + Sync + 'static) -> Subscription {
        self.inner.subscribe(listener)
    }

    pub fn set_event_listener(&self, setup: EventSetup) {
        self.inner.set_event_listener(setup);
    }
}
