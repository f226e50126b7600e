//! `Client`: the facade tying the entry cache, mutation cache, focus/online
//! trackers, and logger together into one object a host application holds
//! (§4.11, §6). Mirrors the teacher's `client::QueryClient`: a cheap-to-clone
//! handle (`Arc`-backed internally) wrapping the keyed caches plus the
//! per-key default overrides consulted before `EntryCache::default_options`.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex as PlMutex;
use parking_lot::RwLock;

use crate::entry::cache::{EntryCache, EntryFilter};
use crate::entry::{Entry, EntryOptions, EntryState, Fetcher};
use crate::error::QueryError;
use crate::focus::FocusTracker;
use crate::key::{IntoKey, Key};
use crate::logger::{default_logger, Logger};
use crate::mutation::cache::MutationCache;
use crate::mutation::{Mutation, MutationFn, MutationOptions};
use crate::observer::infinite::{InfiniteData, InfiniteEntryObserver, PageFetcher, PageParamFn};
use crate::observer::ObserverOptions;
use crate::online::OnlineTracker;
use crate::tracker::Subscription;

/// Whether `invalidate`/`reset` should also trigger a refetch, and for which
/// entries (§4.4 `invalidateQueries({refetchType})`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefetchType {
    /// Only entries with at least one active observer.
    Active,
    /// Every matching entry, active or not.
    All,
    /// Mark matching entries invalidated/reset without refetching them.
    None,
}

impl Default for RefetchType {
    fn default() -> Self {
        Self::Active
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct InvalidateOptions {
    pub refetch_type: RefetchType,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ResetOptions {
    pub refetch_type: RefetchType,
}

/// `cancel_refetch` defaults to `true` (§4.3): an in-flight fetch for a
/// matching entry is cancelled before the fresh one is started, mirroring the
/// source's `cancelRefetch` default.
#[derive(Clone, Copy, Debug)]
pub struct RefetchOptions {
    pub cancel_refetch: bool,
}

impl Default for RefetchOptions {
    fn default() -> Self {
        Self { cancel_refetch: true }
    }
}

/// `revert` defaults to `true` (§4.2 `cancelQueries`): a cancelled fetch
/// rolls the entry back to its pre-fetch state unless told otherwise.
#[derive(Clone, Copy, Debug)]
pub struct CancelOptions {
    pub revert: bool,
    pub silent: bool,
}

impl Default for CancelOptions {
    fn default() -> Self {
        Self {
            revert: true,
            silent: false,
        }
    }
}

/// Client-wide configuration (§6): the default `EntryOptions` new entries get
/// absent a more specific override, plus the collaborators every cache record
/// is built with.
pub struct ClientConfig {
    pub default_entry_options: EntryOptions,
    pub logger: Arc<dyn Logger>,
    pub focus: Arc<FocusTracker>,
    pub online: Arc<OnlineTracker>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_entry_options: EntryOptions::default(),
            logger: default_logger(),
            focus: Arc::new(FocusTracker::new()),
            online: Arc::new(OnlineTracker::new()),
        }
    }
}

/// Per-key default overrides, matched first-registered-partial-match-wins
/// (§6 `setQueryDefaults`). A second registration for a key whose pattern
/// already matches an existing one is logged and otherwise ignored, same as
/// the stale-replacement warning `EntryCache::get_or_create` logs for a type
/// mismatch.
struct QueryDefaults {
    entries: Vec<(Key, EntryOptions)>,
}

/// Mutation defaults are keyed the same way, but `MutationOptions` is generic
/// over `TVars`/`TData`/`TContext`; stored type-erased and downcast on read,
/// the same `Any` trick `EntryCache` uses for heterogeneous `Entry<T>` storage.
struct MutationDefaults {
    entries: Vec<(Key, Arc<dyn Any + Send + Sync>)>,
}

/// The cache/retry engine facade. Cloning a `Client` is cheap and every clone
/// observes the same underlying caches (§4.11).
#[derive(Clone)]
pub struct Client {
    entries: Arc<EntryCache>,
    mutations: Arc<MutationCache>,
    focus: Arc<FocusTracker>,
    online: Arc<OnlineTracker>,
    logger: Arc<dyn Logger>,
    query_defaults: Arc<RwLock<QueryDefaults>>,
    mutation_defaults: Arc<RwLock<MutationDefaults>>,
    mount_count: Arc<AtomicUsize>,
    mount_subs: Arc<PlMutex<Option<(Subscription, Subscription)>>>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        let entries = EntryCache::new(config.online.clone(), config.logger.clone());
        entries.set_default_options(config.default_entry_options);
        Self {
            entries,
            mutations: MutationCache::new(),
            focus: config.focus,
            online: config.online,
            logger: config.logger,
            query_defaults: Arc::new(RwLock::new(QueryDefaults { entries: Vec::new() })),
            mutation_defaults: Arc::new(RwLock::new(MutationDefaults { entries: Vec::new() })),
            mount_count: Arc::new(AtomicUsize::new(0)),
            mount_subs: Arc::new(PlMutex::new(None)),
        }
    }

    /// Registers this client's global focus/online listeners on first call;
    /// ref-counted so nested mounts (e.g. a widget tree) don't stack up
    /// redundant subscriptions (§4.11, §6). On focus regained, stale active
    /// entries are refetched; on reconnect, paused mutations are resumed and
    /// stale active entries refetched, mirroring the source's
    /// `onFocus`/`onOnline` cache-wide hooks.
    pub fn mount(&self) {
        if self.mount_count.fetch_add(1, Ordering::AcqRel) == 0 {
            let this = self.clone();
            let focus_sub = self.focus.subscribe(move |focused| {
                if focused {
                    this.refetch_active_stale();
                }
            });
            let this = self.clone();
            let online_sub = self.online.subscribe(move |online| {
                if online {
                    let this = this.clone();
                    tokio::spawn(async move {
                        this.mutations.resume_paused_mutations().await;
                    });
                    this.refetch_active_stale();
                }
            });
            *self.mount_subs.lock() = Some((focus_sub, online_sub));
        }
    }

    /// Drops this client's global listeners once every mount has unmounted.
    pub fn unmount(&self) {
        if self.mount_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            *self.mount_subs.lock() = None;
        }
    }

    fn refetch_active_stale(&self) {
        let filter = EntryFilter {
            stale_only: true,
            active_only: Some(true),
            ..EntryFilter::default()
        };
        for entry in self.entries.find_all(&filter) {
            tokio::spawn(async move {
                let _ = entry.refetch_dyn().await;
            });
        }
    }

    pub fn get_logger(&self) -> Arc<dyn Logger> {
        self.logger.clone()
    }

    pub fn get_cache(&self) -> Arc<EntryCache> {
        self.entries.clone()
    }

    pub fn get_mutation_cache(&self) -> Arc<MutationCache> {
        self.mutations.clone()
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.mutations.clear();
    }

    /// Registers a default `EntryOptions` override for every key partially
    /// matching `key_pattern` (§6 `setQueryDefaults`). Resolved
    /// first-match-wins in registration order; a pattern that already has a
    /// partial match registered is logged and skipped rather than shadowing
    /// the existing entry silently.
    pub fn set_query_defaults(&self, key_pattern: impl IntoKey, options: EntryOptions) {
        let key_pattern = key_pattern.into_key();
        let mut defaults = self.query_defaults.write();
        if defaults.entries.iter().any(|(existing, _)| existing.partial_match(&key_pattern)) {
            self.logger
                .warn(&format!("query defaults for {key_pattern} overlap an existing pattern; ignoring"));
            return;
        }
        defaults.entries.push((key_pattern, options));
    }

    pub fn get_query_defaults(&self, key: &Key) -> Option<EntryOptions> {
        self.query_defaults
            .read()
            .entries
            .iter()
            .find(|(pattern, _)| key.partial_match(pattern))
            .map(|(_, options)| options.clone())
    }

    pub fn set_mutation_defaults<TVars, TData, TContext>(&self, key_pattern: impl IntoKey, options: MutationOptions<TVars, TData, TContext>)
    where
        TVars: Send + Sync + 'static,
        TData: Send + Sync + 'static,
        TContext: Send + Sync + 'static,
    {
        let key_pattern = key_pattern.into_key();
        let mut defaults = self.mutation_defaults.write();
        if defaults.entries.iter().any(|(existing, _)| existing.partial_match(&key_pattern)) {
            self.logger
                .warn(&format!("mutation defaults for {key_pattern} overlap an existing pattern; ignoring"));
            return;
        }
        defaults.entries.push((key_pattern, Arc::new(options)));
    }

    pub fn get_mutation_defaults<TVars, TData, TContext>(&self, key: &Key) -> Option<MutationOptions<TVars, TData, TContext>>
    where
        TVars: Clone + Send + Sync + 'static,
        TData: Send + Sync + 'static,
        TContext: Send + Sync + 'static,
    {
        self.mutation_defaults
            .read()
            .entries
            .iter()
            .find(|(pattern, _)| key.partial_match(pattern))
            .and_then(|(_, options)| options.clone().downcast::<MutationOptions<TVars, TData, TContext>>().ok())
            .map(|boxed| (*boxed).clone())
    }

    fn resolve_entry_options(&self, key: &Key, explicit: Option<EntryOptions>) -> EntryOptions {
        explicit
            .or_else(|| self.get_query_defaults(key))
            .unwrap_or_else(|| self.entries.default_options())
    }

    fn resolve_entry<T>(&self, key: Key, options: Option<EntryOptions>) -> Entry<T>
    where
        T: Send + Sync + PartialEq + serde::Serialize + serde::de::DeserializeOwned + 'static,
    {
        let resolved = self.resolve_entry_options(&key, options);
        self.entries.get_or_create::<T>(key, Some(resolved))
    }

    /// Fetches `key`, skipping the network round-trip if the cached entry is
    /// still fresh (`staleTime`, §4.3). The common "give me this data" entry
    /// point other helpers (`ensure`, `prefetch`) build on.
    pub async fn fetch<T>(&self, key: impl IntoKey, fetcher: Fetcher<T>, options: Option<EntryOptions>) -> Result<Arc<T>, QueryError>
    where
        T: Send + Sync + PartialEq + serde::Serialize + serde::de::DeserializeOwned + 'static,
    {
        let entry = self.resolve_entry::<T>(key.into_key(), options);
        if !entry.is_stale() {
            if let Some(data) = entry.state().data {
                return Ok(data);
            }
        }
        entry.fetch(fetcher).await
    }

    /// Like [`Client::fetch`], but swallows the error (logging it) instead of
    /// propagating it — the caller only wants the cache warmed, not a result
    /// (§4.11 `prefetchQuery`).
    pub async fn prefetch<T>(&self, key: impl IntoKey, fetcher: Fetcher<T>, options: Option<EntryOptions>) {
        if let Err(error) = self.fetch(key, fetcher, options).await {
            self.logger.warn(&format!("prefetch failed: {error}"));
        }
    }

    /// Returns the cached value for `key` if present, regardless of
    /// staleness, fetching only on a true cache miss (§4.11 `ensureQueryData`).
    pub async fn ensure<T>(&self, key: impl IntoKey, fetcher: Fetcher<T>, options: Option<EntryOptions>) -> Result<Arc<T>, QueryError>
    where
        T: Send + Sync + PartialEq + serde::Serialize + serde::de::DeserializeOwned + 'static,
    {
        let entry = self.resolve_entry::<T>(key.into_key(), options);
        if let Some(data) = entry.state().data {
            return Ok(data);
        }
        entry.fetch(fetcher).await
    }

    pub fn get_data<T>(&self, key: impl IntoKey) -> Option<Arc<T>>
    where
        T: Send + Sync + PartialEq + serde::Serialize + serde::de::DeserializeOwned + 'static,
    {
        self.entries.get::<T>(&key.into_key())?.state().data
    }

    pub fn get_state<T>(&self, key: impl IntoKey) -> Option<EntryState<T>>
    where
        T: Send + Sync + PartialEq + serde::Serialize + serde::de::DeserializeOwned + 'static,
    {
        Some(self.entries.get::<T>(&key.into_key())?.state())
    }

    /// Writes `data` directly into the cache as if it had just been fetched
    /// (`setQueryData`, §4.11). `updater` sees the entry's current data (if
    /// any) so it can merge rather than overwrite; `updated_at` optionally
    /// back-dates the write, subject to the monotonicity rule on
    /// [`Entry::set_data_at`].
    pub fn set_data<T>(&self, key: impl IntoKey, updater: impl FnOnce(Option<Arc<T>>) -> T, updated_at: Option<u64>)
    where
        T: Send + Sync + PartialEq + serde::Serialize + serde::de::DeserializeOwned + 'static,
    {
        let key = key.into_key();
        let entry = self.resolve_entry::<T>(key, None);
        let current = entry.state().data;
        let next = updater(current);
        entry.set_data_at(next, updated_at);
    }

    /// Applies `updater` to every entry matching `filter`, returning the keys
    /// and new values actually touched (§4.11 `setQueriesData`). Entries
    /// whose stored type doesn't match `T` are silently skipped — the same
    /// tolerant behaviour `EntryCache::get_or_create` falls back to on a type
    /// mismatch, just without the warning since this is a filter-driven bulk
    /// operation rather than a single explicit lookup.
    pub fn set_queries_data<T>(&self, filter: &EntryFilter, updater: impl Fn(Option<Arc<T>>) -> T) -> Vec<(Key, Arc<T>)>
    where
        T: Send + Sync + PartialEq + serde::Serialize + serde::de::DeserializeOwned + 'static,
    {
        let mut touched = Vec::new();
        for dyn_entry in self.entries.find_all(filter) {
            if let Some(entry) = dyn_entry.as_any().downcast_ref::<Entry<T>>() {
                let current = entry.state().data;
                let next = updater(current);
                entry.set_data_at(next, None);
                if let Some(data) = entry.state().data {
                    touched.push((entry.key().clone(), data));
                }
            }
        }
        touched
    }

    /// Marks every entry matching `filter` invalidated, optionally refetching
    /// it immediately per `options.refetch_type` (§4.4 `invalidateQueries`).
    pub async fn invalidate(&self, filter: &EntryFilter, options: InvalidateOptions) {
        self.entries.invalidate(filter);
        self.maybe_refetch_matching(filter, options.refetch_type).await;
    }

    /// Drops every entry matching `filter` back to its initial state,
    /// optionally refetching per `options.refetch_type` (§4.4 `resetQueries`).
    pub async fn reset(&self, filter: &EntryFilter, options: ResetOptions) {
        for entry in self.entries.find_all(filter) {
            entry.reset();
        }
        self.maybe_refetch_matching(filter, options.refetch_type).await;
    }

    async fn maybe_refetch_matching(&self, filter: &EntryFilter, refetch_type: RefetchType) {
        if refetch_type == RefetchType::None {
            return;
        }
        let mut scoped = filter.clone();
        if refetch_type == RefetchType::Active {
            scoped.active_only = Some(true);
        }
        let futures: Vec<_> = self.entries.find_all(&scoped).into_iter().map(|entry| async move { entry.refetch_dyn().await }).collect();
        join_all(futures).await;
    }

    /// Refetches every entry matching `filter`, cancelling any in-flight
    /// fetch first unless `options.cancel_refetch` is `false` (§4.3, §4.4
    /// `refetchQueries`).
    pub async fn refetch(&self, filter: &EntryFilter, options: RefetchOptions) {
        let entries = self.entries.find_all(filter);
        if options.cancel_refetch {
            for entry in &entries {
                entry.cancel_fetch(false, true);
            }
        }
        let futures: Vec<_> = entries.into_iter().map(|entry| async move { entry.refetch_dyn().await }).collect();
        join_all(futures).await;
    }

    /// Cancels the in-flight fetch for every entry matching `filter` (§4.2,
    /// §4.4 `cancelQueries`).
    pub fn cancel(&self, filter: &EntryFilter, options: CancelOptions) {
        self.entries.cancel(filter, options.revert, options.silent);
    }

    pub fn remove(&self, filter: &EntryFilter) {
        self.entries.remove_matching(filter);
    }

    pub fn is_fetching(&self, filter: &EntryFilter) -> usize {
        self.entries.is_fetching(filter)
    }

    /// Count of mutations currently running (§6 `isMutating`).
    pub fn is_mutating(&self) -> usize {
        self.mutations.find_all().iter().filter(|m| m.is_loading()).count()
    }

    /// Runs `page_fetcher` for the first page (or re-runs every accumulated
    /// page, if the backing entry already has data), storing the result under
    /// `key` (§4.6, §6 `fetchInfiniteQuery`).
    #[allow(clippy::too_many_arguments)]
    pub async fn fetch_infinite<P>(
        &self,
        key: impl IntoKey,
        page_fetcher: PageFetcher<P>,
        initial_param: serde_json::Value,
        get_next_page_param: PageParamFn<P>,
        get_previous_page_param: Option<PageParamFn<P>>,
        options: Option<EntryOptions>,
    ) -> Result<Arc<InfiniteData<P>>, QueryError>
    where
        P: Send + Sync + PartialEq + Clone + serde::Serialize + serde::de::DeserializeOwned + 'static,
    {
        let entry = self.resolve_entry::<InfiniteData<P>>(key.into_key(), options);
        let observer = InfiniteEntryObserver::new(
            entry,
            page_fetcher,
            initial_param,
            get_next_page_param,
            get_previous_page_param,
            ObserverOptions::default(),
        );
        observer.initial_fetch().await
    }

    /// Like [`Client::fetch_infinite`], swallowing the error.
    #[allow(clippy::too_many_arguments)]
    pub async fn prefetch_infinite<P>(
        &self,
        key: impl IntoKey,
        page_fetcher: PageFetcher<P>,
        initial_param: serde_json::Value,
        get_next_page_param: PageParamFn<P>,
        get_previous_page_param: Option<PageParamFn<P>>,
        options: Option<EntryOptions>,
    ) where
        P: Send + Sync + PartialEq + Clone + serde::Serialize + serde::de::DeserializeOwned + 'static,
    {
        if let Err(error) = self
            .fetch_infinite(key, page_fetcher, initial_param, get_next_page_param, get_previous_page_param, options)
            .await
        {
            self.logger.warn(&format!("prefetch_infinite failed: {error}"));
        }
    }

    /// Starts one mutation run, tracking it in the mutation cache so a
    /// network-paused attempt can be resumed on reconnect and swept by
    /// [`Client::clear`] (§4.8). Returns the handle (for `cancel_token`/
    /// `is_paused` access) alongside the future driving it to completion.
    pub fn mutate<TVars, TData, TContext>(
        &self,
        mutation_fn: MutationFn<TVars, TData>,
        options: MutationOptions<TVars, TData, TContext>,
        vars: TVars,
    ) -> (
        Mutation<TVars, TData, TContext>,
        impl std::future::Future<Output = Result<Arc<TData>, QueryError>>,
    )
    where
        TVars: Clone + Send + Sync + 'static,
        TData: Send + Sync + 'static,
        TContext: Send + Sync + 'static,
    {
        let mutation = Mutation::new(mutation_fn, options, self.online.clone());
        self.mutations.track(Arc::new(mutation.clone()));
        let run = mutation.clone();
        (mutation, async move { run.execute(vars).await })
    }
}
