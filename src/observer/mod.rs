//! `EntryObserver<T>`: one subscriber's view onto an `Entry<T>` (§4.5).
//!
//! An observer layers a `select` projection and stale/refetch timers on top
//! of the entry's raw state, and is the thing that actually triggers fetches
//! (mount, key change, window focus, reconnect) — the entry itself is passive.

pub mod infinite;
pub mod multi;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use crate::entry::{Entry, EntryOptions, EntryState, FetchStatus, Fetcher, Status};
use crate::error::QueryError;
use crate::focus::FocusTracker;
use crate::key::Key;
use crate::online::OnlineTracker;
use crate::tracker::Subscription;

/// Selects and reshapes `T` into whatever an observer's caller actually
/// wants; kept dynamically typed (`serde_json::Value`) rather than a second
/// generic parameter, the same pragmatic choice `Key` makes for its segments.
pub type Selector<T> = Arc<dyn Fn(&T) -> Result<Value, QueryError> + Send + Sync>;

#[derive(Clone)]
pub struct ObserverOptions<T> {
    pub enabled: bool,
    pub refetch_interval: Option<Duration>,
    pub refetch_on_focus: bool,
    pub refetch_on_reconnect: bool,
    pub refetch_on_mount: bool,
    pub keep_previous_data: bool,
    pub select: Option<Selector<T>>,
}

impl<T> Default for ObserverOptions<T> {
    fn default() -> Self {
        Self {
            enabled: true,
            refetch_interval: None,
            refetch_on_focus: true,
            refetch_on_reconnect: true,
            refetch_on_mount: true,
            keep_previous_data: false,
            select: None,
        }
    }
}

/// The derived, observer-facing view of an entry's state (§4.5).
pub struct EntryResult<T> {
    pub status: Status,
    pub fetch_status: FetchStatus,
    pub data: Option<Arc<T>>,
    pub selected_data: Option<Value>,
    pub error: Option<QueryError>,
    pub is_fetching: bool,
    pub is_stale: bool,
    pub is_placeholder_data: bool,
    pub fetch_failure_count: u32,
}

impl<T> Clone for EntryResult<T> {
    fn clone(&self) -> Self {
        Self {
            status: self.status,
            fetch_status: self.fetch_status,
            data: self.data.clone(),
            selected_data: self.selected_data.clone(),
            error: self.error.clone(),
            is_fetching: self.is_fetching,
            is_stale: self.is_stale,
            is_placeholder_data: self.is_placeholder_data,
            fetch_failure_count: self.fetch_failure_count,
        }
    }
}

impl<T> EntryResult<T> {
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == Status::Error
    }

    pub fn is_pending(&self) -> bool {
        self.status == Status::Pending
    }
}

type ChangeListener<T> = Arc<dyn Fn(&EntryResult<T>) + Send + Sync>;

struct ObserverInner<T> {
    entry: Entry<T>,
    fetcher: Fetcher<T>,
    options: Mutex<ObserverOptions<T>>,
    listeners: Mutex<Vec<(u64, ChangeListener<T>)>>,
    next_listener_id: std::sync::atomic::AtomicU64,
    entry_listener_id: Mutex<Option<u64>>,
    previous_data: Mutex<Option<Arc<T>>>,
    mounted: AtomicBool,
    interval_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    _focus_sub: Mutex<Option<Subscription>>,
    _online_sub: Mutex<Option<Subscription>>,
}

/// One subscriber's live view onto an `Entry<T>`. Dropping (or calling
/// `unsubscribe`) tears down its timers and entry registration.
pub struct EntryObserver<T> {
    inner: Arc<ObserverInner<T>>,
}

impl<T> Clone for EntryObserver<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: Send + Sync + PartialEq + serde::Serialize + serde::de::DeserializeOwned + 'static> EntryObserver<T> {
    pub fn new(entry: Entry<T>, fetcher: Fetcher<T>, options: ObserverOptions<T>) -> Self {
        Self {
            inner: Arc::new(ObserverInner {
                entry,
                fetcher,
                options: Mutex::new(options),
                listeners: Mutex::new(Vec::new()),
                next_listener_id: std::sync::atomic::AtomicU64::new(0),
                entry_listener_id: Mutex::new(None),
                previous_data: Mutex::new(None),
                mounted: AtomicBool::new(false),
                interval_handle: Mutex::new(None),
                _focus_sub: Mutex::new(None),
                _online_sub: Mutex::new(None),
            }),
        }
    }

    pub fn key(&self) -> &Key {
        self.inner.entry.key()
    }

    pub fn set_options(&self, options: ObserverOptions<T>) {
        *self.inner.options.lock() = options;
    }

    /// Seeds `previous_data` before the observer has ever fetched, so a
    /// freshly created observer can report another key's last-known data as
    /// placeholder content (`isPreviousData`) from its very first result —
    /// used for positional `keep_previous_data` adoption across a list
    /// reconciliation (§4.7).
    pub fn seed_previous_data(&self, data: Arc<T>) {
        *self.inner.previous_data.lock() = Some(data);
    }

    /// Mounts the observer: registers with the entry, wires up focus/online/
    /// interval refetch timers, fetches if `should_fetch_on_mount`, and
    /// begins forwarding entry state changes to `listener`.
    pub fn subscribe(
        &self,
        focus: &FocusTracker,
        online: &OnlineTracker,
        listener: impl Fn(&EntryResult<T>) + Send + Sync + 'static,
    ) -> u64 {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().push((id, Arc::new(listener)));

        if !self.inner.mounted.swap(true, Ordering::AcqRel) {
            self.inner.entry.add_observer();
            let this = self.clone();
            let entry_listener = self.inner.entry.subscribe(move |state| this.on_entry_state(state));
            *self.inner.entry_listener_id.lock() = Some(entry_listener);

            let this = self.clone();
            *self.inner._focus_sub.lock() = Some(focus.subscribe(move |focused| {
                if focused {
                    this.maybe_refetch_on("focus");
                }
            }));

            let this = self.clone();
            *self.inner._online_sub.lock() = Some(online.subscribe(move |is_online| {
                if is_online {
                    this.maybe_refetch_on("reconnect");
                }
            }));

            self.start_interval_if_configured();

            if self.should_fetch_on_mount() {
                self.trigger_fetch();
            }
        }
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        self.inner.listeners.lock().retain(|(lid, _)| *lid != id);
        if self.inner.listeners.lock().is_empty() && self.inner.mounted.swap(false, Ordering::AcqRel) {
            if let Some(entry_listener) = self.inner.entry_listener_id.lock().take() {
                self.inner.entry.unsubscribe(entry_listener);
            }
            self.inner.entry.remove_observer();
            if let Some(handle) = self.inner.interval_handle.lock().take() {
                handle.abort();
            }
            *self.inner._focus_sub.lock() = None;
            *self.inner._online_sub.lock() = None;
        }
    }

    fn should_fetch_on_mount(&self) -> bool {
        let options = self.inner.options.lock();
        if !options.enabled {
            return false;
        }
        options.refetch_on_mount && (self.inner.entry.is_stale() || self.inner.entry.state().data.is_none())
    }

    fn maybe_refetch_on(&self, trigger: &str) {
        let options = self.inner.options.lock();
        let allowed = match trigger {
            "focus" => options.refetch_on_focus,
            "reconnect" => options.refetch_on_reconnect,
            _ => false,
        };
        if allowed && options.enabled && self.inner.entry.is_stale() {
            drop(options);
            self.trigger_fetch();
        }
    }

    fn start_interval_if_configured(&self) {
        let interval = self.inner.options.lock().refetch_interval;
        if let Some(interval) = interval {
            let this = self.clone();
            let handle = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if this.inner.options.lock().enabled {
                        this.trigger_fetch();
                    }
                }
            });
            *self.inner.interval_handle.lock() = Some(handle);
        }
    }

    /// Spawns a fetch, ignoring its error: observers learn of failures
    /// through the entry's state, not this call's return value.
    pub fn trigger_fetch(&self) {
        let entry = self.inner.entry.clone();
        let fetcher = self.inner.fetcher.clone();
        tokio::spawn(async move {
            let _ = entry.fetch(fetcher).await;
        });
    }

    /// Awaits one fetch to completion and returns it (`refetch`, §4.5).
    pub async fn refetch(&self) -> Result<Arc<T>, QueryError> {
        self.inner.entry.fetch(self.inner.fetcher.clone()).await
    }

    pub fn invalidate(&self) {
        self.inner.entry.invalidate();
    }

    fn on_entry_state(&self, state: &EntryState<T>) {
        if state.data.is_some() {
            *self.inner.previous_data.lock() = state.data.clone();
        }
        let result = self.derive_result(state);
        let listeners: Vec<ChangeListener<T>> = self.inner.listeners.lock().iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            listener(&result);
        }
    }

    /// Builds the observer-facing `EntryResult`, layering keep-previous-data
    /// and `select` over the entry's raw state (§4.5).
    pub fn get_current_result(&self) -> EntryResult<T> {
        self.derive_result(&self.inner.entry.state())
    }

    fn derive_result(&self, state: &EntryState<T>) -> EntryResult<T> {
        let options = self.inner.options.lock();
        let keep_previous = options.keep_previous_data;
        let (data, is_placeholder) = match (&state.data, keep_previous) {
            (Some(data), _) => (Some(data.clone()), false),
            (None, true) => (self.inner.previous_data.lock().clone(), true),
            (None, false) => (None, false),
        };

        let selected_data = match (&options.select, &data) {
            (Some(select), Some(data)) => select(data).ok(),
            _ => None,
        };

        EntryResult {
            status: state.status,
            fetch_status: state.fetch_status,
            data,
            selected_data,
            error: state.error.clone(),
            is_fetching: state.fetch_status == FetchStatus::Fetching,
            is_stale: self.inner.entry.is_stale(),
            is_placeholder_data: is_placeholder,
            fetch_failure_count: state.fetch_failure_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::IntoKey;
    use crate::logger::default_logger;
    use futures::FutureExt;
    use std::sync::Mutex as StdMutex;

    fn entry() -> Entry<u32> {
        Entry::new(
            "counter".into_key(),
            EntryOptions::default(),
            Arc::new(OnlineTracker::new()),
            default_logger(),
            Arc::new(|_| {}),
        )
    }

    #[tokio::test]
    async fn subscribing_triggers_initial_fetch_when_stale() {
        let fetcher: Fetcher<u32> = Arc::new(|_ctx| async { Ok(10u32) }.boxed());
        let observer = EntryObserver::new(entry(), fetcher, ObserverOptions::default());
        let focus = FocusTracker::new();
        let online = OnlineTracker::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen2 = seen.clone();
        let _id = observer.subscribe(&focus, &online, move |result| {
            if let Some(data) = &result.data {
                seen2.lock().unwrap().push(**data);
            }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*seen.lock().unwrap(), vec![10]);
    }

    #[tokio::test]
    async fn keep_previous_data_survives_key_change_style_reset() {
        let fetcher: Fetcher<u32> = Arc::new(|_ctx| async { Ok(1u32) }.boxed());
        let mut options = ObserverOptions::default();
        options.keep_previous_data = true;
        let observer = EntryObserver::new(entry(), fetcher, options);
        let focus = FocusTracker::new();
        let online = OnlineTracker::new();
        let _id = observer.subscribe(&focus, &online, |_| {});
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(*observer.get_current_result().data.unwrap(), 1);
    }
}
