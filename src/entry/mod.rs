//! `Entry<T>`: the per-key cache record (§3, §4.3).
//!
//! An `Entry` owns its current state, fetch lifecycle, subscriber count, and
//! garbage-collection timer. Concurrent `fetch()` calls against the same
//! entry share one in-flight attempt (§4.3 "Concurrent fetch calls share the
//! same promise") rather than issuing redundant network work.

pub mod cache;

use std::any::Any;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::cancel::CancelToken;
use crate::error::QueryError;
use crate::key::{Key, KeyHash};
use crate::logger::Logger;
use crate::notify::NotifyManager;
use crate::online::OnlineTracker;
use crate::retry::{NetworkMode, RetryConfig, Retryer};
use crate::sharing::{share, share_arc, SharingMode};

/// Wall-clock milliseconds since epoch, the persisted counterpart of the
/// monotonic `Instant` the rest of `EntryState` uses for staleness math —
/// needed because a hydrated snapshot must compare `dataUpdatedAt` across
/// process restarts, where `Instant` has no stable meaning (§4.10).
pub(crate) fn epoch_millis_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Coarse request lifecycle (mirrors `status` in the source).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Pending,
    Success,
    Error,
}

/// Whether a fetch is currently in flight (mirrors `fetchStatus`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchStatus {
    Idle,
    Fetching,
    Paused,
}

/// Snapshot of an entry's data/error/lifecycle state (§4.3).
pub struct EntryState<T> {
    pub status: Status,
    pub fetch_status: FetchStatus,
    pub data: Option<Arc<T>>,
    pub data_updated_at: Option<Instant>,
    /// Wall-clock counterpart of `data_updated_at` (§4.10).
    pub data_updated_at_epoch_ms: Option<u64>,
    pub error: Option<QueryError>,
    pub error_updated_at: Option<Instant>,
    pub fetch_failure_count: u32,
    pub fetch_failure_reason: Option<QueryError>,
    pub is_invalidated: bool,
}

impl<T> Clone for EntryState<T> {
    fn clone(&self) -> Self {
        Self {
            status: self.status,
            fetch_status: self.fetch_status,
            data: self.data.clone(),
            data_updated_at: self.data_updated_at,
            data_updated_at_epoch_ms: self.data_updated_at_epoch_ms,
            error: self.error.clone(),
            error_updated_at: self.error_updated_at,
            fetch_failure_count: self.fetch_failure_count,
            fetch_failure_reason: self.fetch_failure_reason.clone(),
            is_invalidated: self.is_invalidated,
        }
    }
}

impl<T> Default for EntryState<T> {
    fn default() -> Self {
        Self {
            status: Status::Pending,
            fetch_status: FetchStatus::Idle,
            data: None,
            data_updated_at: None,
            data_updated_at_epoch_ms: None,
            error: None,
            error_updated_at: None,
            fetch_failure_count: 0,
            fetch_failure_reason: None,
            is_invalidated: false,
        }
    }
}

impl<T> EntryState<T> {
    pub fn is_stale(&self, stale_time: Duration) -> bool {
        if self.is_invalidated {
            return true;
        }
        match self.data_updated_at {
            None => true,
            Some(at) => at.elapsed() >= stale_time,
        }
    }
}

/// Per-entry tunables (§4.3, §6).
#[derive(Clone)]
pub struct EntryOptions {
    pub stale_time: Duration,
    pub cache_time: Duration,
    pub retry: RetryConfig,
    pub structural_sharing: SharingMode,
}

impl Default for EntryOptions {
    fn default() -> Self {
        Self {
            stale_time: Duration::ZERO,
            cache_time: Duration::from_secs(5 * 60),
            retry: RetryConfig::default(),
            structural_sharing: SharingMode::Enabled,
        }
    }
}

/// Arguments handed to a fetcher function for one attempt (§4.3).
#[derive(Clone)]
pub struct FetchContext {
    pub key: Key,
    pub cancel: CancelToken,
    pub attempt: u32,
}

pub type Fetcher<T> = Arc<dyn Fn(FetchContext) -> BoxFuture<'static, Result<T, QueryError>> + Send + Sync>;
type SharedFetch<T> = Shared<BoxFuture<'static, Result<Arc<T>, QueryError>>>;
type StateListener<T> = Arc<dyn Fn(&EntryState<T>) + Send + Sync>;

struct EntryInner<T> {
    key: Key,
    key_hash: KeyHash,
    state: Mutex<EntryState<T>>,
    options: Mutex<EntryOptions>,
    observer_count: AtomicUsize,
    online: Arc<OnlineTracker>,
    notify: NotifyManager,
    logger: Arc<dyn Logger>,
    in_flight: Mutex<Option<SharedFetch<T>>>,
    active_cancel: Mutex<Option<CancelToken>>,
    /// The most recently used fetcher, remembered so cache-wide operations
    /// (`Client::refetch`, `Client::invalidate` with a refetch type) can
    /// re-run a fetch without the caller supplying one again — "Resolve
    /// queryFn: use Entry's or fall back to the first observer's" (§4.3).
    last_fetcher: Mutex<Option<Fetcher<T>>>,
    listeners: Mutex<Vec<(u64, StateListener<T>)>>,
    next_listener_id: AtomicU64,
    gc_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    on_gc: Arc<dyn Fn(&KeyHash) + Send + Sync>,
}

/// A typed handle onto one cache record. Cheap to clone; all clones share
/// the same underlying state.
pub struct Entry<T> {
    inner: Arc<EntryInner<T>>,
}

impl<T> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + Sync + PartialEq + serde::Serialize + serde::de::DeserializeOwned + 'static> Entry<T> {
    pub(crate) fn new(
        key: Key,
        options: EntryOptions,
        online: Arc<OnlineTracker>,
        logger: Arc<dyn Logger>,
        on_gc: Arc<dyn Fn(&KeyHash) + Send + Sync>,
    ) -> Self {
        let key_hash = key.hash();
        let entry = Self {
            inner: Arc::new(EntryInner {
                key,
                key_hash,
                state: Mutex::new(EntryState::default()),
                options: Mutex::new(options),
                observer_count: AtomicUsize::new(0),
                online,
                notify: NotifyManager::new(),
                logger,
                in_flight: Mutex::new(None),
                active_cancel: Mutex::new(None),
                last_fetcher: Mutex::new(None),
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(0),
                gc_handle: Mutex::new(None),
                on_gc,
            }),
        };
        entry.schedule_gc();
        entry
    }

    pub fn key(&self) -> &Key {
        &self.inner.key
    }

    pub fn key_hash(&self) -> &KeyHash {
        &self.inner.key_hash
    }

    pub fn state(&self) -> EntryState<T> {
        self.inner.state.lock().clone()
    }

    pub fn is_stale(&self) -> bool {
        let stale_time = self.inner.options.lock().stale_time;
        self.inner.state.lock().is_stale(stale_time)
    }

    pub fn is_fetching(&self) -> bool {
        self.inner.state.lock().fetch_status == FetchStatus::Fetching
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observer_count.load(Ordering::Acquire)
    }

    pub fn set_options(&self, options: EntryOptions) {
        *self.inner.options.lock() = options;
    }

    pub fn options(&self) -> EntryOptions {
        self.inner.options.lock().clone()
    }

    /// Subscribes to state changes; returns an id to pass to `unsubscribe`.
    pub fn subscribe(&self, listener: impl Fn(&EntryState<T>) + Send + Sync + 'static) -> u64 {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        self.inner.listeners.lock().retain(|(lid, _)| *lid != id);
    }

    /// Registers one active observer, cancelling any pending GC.
    pub fn add_observer(&self) -> usize {
        let count = self.inner.observer_count.fetch_add(1, Ordering::AcqRel) + 1;
        if let Some(handle) = self.inner.gc_handle.lock().take() {
            handle.abort();
        }
        count
    }

    /// Unregisters an observer; schedules GC once the count reaches zero.
    pub fn remove_observer(&self) -> usize {
        let previous = self.inner.observer_count.fetch_sub(1, Ordering::AcqRel);
        let count = previous.saturating_sub(1);
        if count == 0 {
            self.schedule_gc();
        }
        count
    }

    fn schedule_gc(&self) {
        let cache_time = self.inner.options.lock().cache_time;
        if cache_time.is_zero() {
            (self.inner.on_gc)(&self.inner.key_hash);
            return;
        }
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(cache_time).await;
            if inner.observer_count.load(Ordering::Acquire) == 0 {
                (inner.on_gc)(&inner.key_hash);
            }
        });
        if let Some(previous) = self.inner.gc_handle.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Directly overwrites data, as if it had just been fetched successfully
    /// (`setQueryData`, §4.11).
    pub fn set_data(&self, data: T) {
        let shared = {
            let options = self.inner.options.lock();
            let mut state = self.inner.state.lock();
            let arc = share(state.data.as_ref(), data, options.structural_sharing);
            state.data = Some(arc);
            state.status = Status::Success;
            state.data_updated_at = Some(Instant::now());
            state.data_updated_at_epoch_ms = Some(epoch_millis_now());
            state.error = None;
            state.is_invalidated = false;
            state.clone()
        };
        self.notify_listeners(shared);
    }

    /// Overwrites the whole state wholesale (used by hydration, §4.10).
    pub fn set_state(&self, state: EntryState<T>) {
        *self.inner.state.lock() = state.clone();
        self.notify_listeners(state);
    }

    /// Drops back to the entry's initial (never-fetched) state, as if it had
    /// just been created (`Client::resetQueries`, §4.4). Does not forget the
    /// last fetcher or tear down observers — only the data/error snapshot.
    pub fn reset(&self) {
        self.set_state(EntryState::default());
    }

    pub fn invalidate(&self) {
        let state = {
            let mut state = self.inner.state.lock();
            state.is_invalidated = true;
            state.clone()
        };
        self.notify_listeners(state);
    }

    /// Cancels the in-flight fetch, if any (§4.2, §7).
    pub fn cancel_fetch(&self, revert: bool, silent: bool) {
        if let Some(token) = self.inner.active_cancel.lock().as_ref() {
            token.cancel(revert, silent);
        }
    }

    fn notify_listeners(&self, state: EntryState<T>) {
        let listeners: Vec<StateListener<T>> = self.inner.listeners.lock().iter().map(|(_, l)| l.clone()).collect();
        self.inner.notify.batch(|| {
            for listener in listeners {
                listener(&state);
            }
        });
    }

    fn on_fetch_start(&self) {
        let state = {
            let mut state = self.inner.state.lock();
            state.fetch_status = FetchStatus::Fetching;
            state.clone()
        };
        self.notify_listeners(state);
    }

    fn on_success(&self, data: Arc<T>) {
        let state = {
            let options = self.inner.options.lock();
            let mut state = self.inner.state.lock();
            let shared = share_arc(state.data.as_ref(), data, options.structural_sharing);
            state.data = Some(shared);
            state.status = Status::Success;
            state.fetch_status = FetchStatus::Idle;
            state.data_updated_at = Some(Instant::now());
            state.data_updated_at_epoch_ms = Some(epoch_millis_now());
            state.error = None;
            state.fetch_failure_count = 0;
            state.fetch_failure_reason = None;
            state.is_invalidated = false;
            state.clone()
        };
        self.notify_listeners(state);
    }

    fn on_error(&self, error: QueryError) {
        if error.is_silent_cancel() {
            let mut state = self.inner.state.lock();
            state.fetch_status = FetchStatus::Idle;
            return;
        }
        let state = {
            let mut state = self.inner.state.lock();
            state.status = Status::Error;
            state.fetch_status = FetchStatus::Idle;
            state.error = Some(error.clone());
            state.error_updated_at = Some(Instant::now());
            state.fetch_failure_count += 1;
            state.fetch_failure_reason = Some(error);
            state.clone()
        };
        self.notify_listeners(state);
    }

    /// Runs (or joins) a fetch for this entry, sharing one in-flight attempt
    /// across concurrent callers (§4.3).
    pub async fn fetch(&self, fetcher: Fetcher<T>) -> Result<Arc<T>, QueryError> {
        let existing = self.inner.in_flight.lock().clone();
        if let Some(shared) = existing {
            return shared.await;
        }
        *self.inner.last_fetcher.lock() = Some(fetcher.clone());

        let cancel = CancelToken::new();
        *self.inner.active_cancel.lock() = Some(cancel.clone());
        let options = self.inner.options.lock().clone();
        let online = self.inner.online.clone();
        let key = self.inner.key.clone();
        let this = self.clone();

        this.on_fetch_start();

        let retryer = Retryer::new(cancel.clone(), online);
        let fut: BoxFuture<'static, Result<Arc<T>, QueryError>> = async move {
            let retry_config = options.retry.clone();
            let result = retryer
                .run(&retry_config, |attempt| {
                    let ctx = FetchContext {
                        key: key.clone(),
                        cancel: cancel.clone(),
                        attempt,
                    };
                    fetcher(ctx)
                })
                .await
                .map(Arc::new);

            match &result {
                Ok(value) => this.on_success(value.clone()),
                Err(err) => this.on_error(err.clone()),
            }
            *this.inner.in_flight.lock() = None;
            *this.inner.active_cancel.lock() = None;
            result
        }
        .boxed();

        let shared = fut.shared();
        *self.inner.in_flight.lock() = Some(shared.clone());
        let _driver = tokio::spawn({
            let shared = shared.clone();
            async move {
                let _ = shared.await;
            }
        });
        shared.await
    }

    /// Re-runs a fetch using the last fetcher passed to [`Entry::fetch`],
    /// for cache-wide operations (`Client::refetch`, `Client::invalidate`)
    /// that locate entries by filter rather than by typed handle (§4.3, §6).
    /// Fails with [`QueryError::MissingFetcher`] if this entry was built by
    /// hydration and has never been fetched from directly.
    pub async fn refetch(&self) -> Result<Arc<T>, QueryError> {
        let fetcher = self.inner.last_fetcher.lock().clone();
        match fetcher {
            Some(fetcher) => self.fetch(fetcher).await,
            None => {
                let err = QueryError::MissingFetcher(self.inner.key_hash.clone());
                self.inner.logger.error(&err.to_string());
                Err(err)
            }
        }
    }

    /// Like [`Entry::set_data`], but allows the caller to back-date
    /// `dataUpdatedAt` (used by `Client::set_data({updatedAt})`, §6). An
    /// `updated_at` older than the value already stored is dropped per
    /// §3's monotonicity invariant.
    pub fn set_data_at(&self, data: T, updated_at: Option<u64>) {
        let shared = {
            let options = self.inner.options.lock();
            let mut state = self.inner.state.lock();
            if let (Some(at), Some(existing)) = (updated_at, state.data_updated_at_epoch_ms) {
                if at < existing {
                    return;
                }
            }
            let arc = share(state.data.as_ref(), data, options.structural_sharing);
            state.data = Some(arc);
            state.status = Status::Success;
            state.data_updated_at = Some(Instant::now());
            state.data_updated_at_epoch_ms = Some(updated_at.unwrap_or_else(epoch_millis_now));
            state.error = None;
            state.is_invalidated = false;
            state.clone()
        };
        self.notify_listeners(shared);
    }

    /// Serializes the current state into the canonical snapshot shape
    /// (§4.10 persistence format), or `None` if there is no data to persist.
    pub fn dehydrate(&self) -> Option<serde_json::Value> {
        let state = self.state();
        let data = state.data.as_deref().map(serde_json::to_value).transpose().ok()??;
        Some(serde_json::json!({
            "status": match state.status {
                Status::Pending => "pending",
                Status::Success => "success",
                Status::Error => "error",
            },
            "data": data,
            "dataUpdatedAt": state.data_updated_at_epoch_ms,
            "fetchFailureCount": state.fetch_failure_count,
            "isInvalidated": state.is_invalidated,
        }))
    }

    /// Applies a snapshot produced by `dehydrate`, following §4.10's
    /// freshness rule: a snapshot strictly older than what's already cached
    /// is dropped.
    pub fn hydrate(&self, snapshot: &serde_json::Value) {
        let existing_at = self.state().data_updated_at_epoch_ms;
        let hydrated_at = snapshot.get("dataUpdatedAt").and_then(|v| v.as_u64());
        if let (Some(existing), Some(hydrated)) = (existing_at, hydrated_at) {
            if existing >= hydrated {
                return;
            }
        }
        let Some(data) = snapshot.get("data").cloned() else {
            return;
        };
        let Ok(data) = serde_json::from_value::<T>(data) else {
            return;
        };
        let mut state = EntryState {
            status: Status::Success,
            fetch_status: FetchStatus::Idle,
            data: Some(Arc::new(data)),
            data_updated_at: Some(Instant::now()),
            data_updated_at_epoch_ms: hydrated_at,
            ..EntryState::default()
        };
        if let Some(count) = snapshot.get("fetchFailureCount").and_then(|v| v.as_u64()) {
            state.fetch_failure_count = count as u32;
        }
        if let Some(invalidated) = snapshot.get("isInvalidated").and_then(|v| v.as_bool()) {
            state.is_invalidated = invalidated;
        }
        self.set_state(state);
    }
}

/// Type-erased view of an `Entry<T>` for storage in a heterogeneous cache
/// (§3, §4.4). Resolves the Open Question on heterogeneous storage: a typed
/// facade (`Entry<T>`) over an erased trait object, downcast via `as_any`.
pub trait EntryDyn: Send + Sync {
    fn key(&self) -> &Key;
    fn key_hash(&self) -> &KeyHash;
    fn observer_count(&self) -> usize;
    fn is_stale(&self) -> bool;
    fn is_fetching(&self) -> bool;
    fn invalidate(&self);
    /// Drops the entry back to its initial state (§4.4 `resetQueries`).
    fn reset(&self);
    fn cancel_fetch(&self, revert: bool, silent: bool);
    fn remove_observer(&self) -> usize;
    fn add_observer(&self) -> usize;
    fn as_any(&self) -> &dyn Any;
    /// `None` if this entry has never held data, per §4.10's default
    /// dehydrate filter (`status='success'`).
    fn dehydrate(&self) -> Option<serde_json::Value>;
    /// Re-runs the last fetch this entry saw, type-erased (§4.3, §6
    /// `Client::refetch`/`invalidate`). A no-op `Ok(())` for an entry that
    /// never had a fetcher attached would hide a real problem, so this
    /// surfaces `MissingFetcher` instead.
    fn refetch_dyn(&self) -> BoxFuture<'static, Result<(), QueryError>>;
}

impl<T: Send + Sync + PartialEq + serde::Serialize + serde::de::DeserializeOwned + 'static> EntryDyn for Entry<T> {
    fn key(&self) -> &Key {
        Entry::key(self)
    }

    fn key_hash(&self) -> &KeyHash {
        Entry::key_hash(self)
    }

    fn observer_count(&self) -> usize {
        Entry::observer_count(self)
    }

    fn is_stale(&self) -> bool {
        Entry::is_stale(self)
    }

    fn is_fetching(&self) -> bool {
        Entry::is_fetching(self)
    }

    fn invalidate(&self) {
        Entry::invalidate(self)
    }

    fn reset(&self) {
        Entry::reset(self)
    }

    fn cancel_fetch(&self, revert: bool, silent: bool) {
        Entry::cancel_fetch(self, revert, silent)
    }

    fn remove_observer(&self) -> usize {
        Entry::remove_observer(self)
    }

    fn add_observer(&self) -> usize {
        Entry::add_observer(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn refetch_dyn(&self) -> BoxFuture<'static, Result<(), QueryError>> {
        let this = self.clone();
        async move { this.refetch().await.map(|_| ()) }.boxed()
    }

    fn dehydrate(&self) -> Option<serde_json::Value> {
        Entry::dehydrate(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::IntoKey;

    fn test_entry() -> Entry<u32> {
        Entry::new(
            "users".into_key(),
            EntryOptions::default(),
            Arc::new(OnlineTracker::new()),
            crate::logger::default_logger(),
            Arc::new(|_| {}),
        )
    }

    #[tokio::test]
    async fn fetch_resolves_and_updates_state() {
        let entry = test_entry();
        let fetcher: Fetcher<u32> = Arc::new(|_ctx| async { Ok(7u32) }.boxed());
        let result = entry.fetch(fetcher).await.unwrap();
        assert_eq!(*result, 7);
        let state = entry.state();
        assert_eq!(state.status, Status::Success);
        assert_eq!(*state.data.unwrap(), 7);
    }

    #[tokio::test]
    async fn concurrent_fetches_share_one_attempt() {
        let entry = test_entry();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let fetcher: Fetcher<u32> = Arc::new(move |_ctx| {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(1u32)
            }
            .boxed()
        });
        let (a, b) = tokio::join!(entry.fetch(fetcher.clone()), entry.fetch(fetcher));
        assert_eq!(*a.unwrap(), 1);
        assert_eq!(*b.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn set_data_keeps_arc_identity_on_equal_value() {
        let entry = test_entry();
        entry.set_data(1);
        let first = entry.state().data.unwrap();
        entry.set_data(1);
        let second = entry.state().data.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn observer_lifecycle_schedules_and_cancels_gc() {
        let entry = test_entry();
        entry.add_observer();
        assert_eq!(entry.observer_count(), 1);
        entry.remove_observer();
        assert_eq!(entry.observer_count(), 0);
    }
}
