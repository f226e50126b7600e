//! `Mutation<TVars, TData, TContext>`: a single imperative write (§4.8).
//!
//! Unlike an `Entry`, a mutation has no key-addressed cache slot and is not
//! shared between callers — each `mutate()` call gets its own `Mutation`,
//! tracked in the `MutationCache` only so it can be paused/resumed and swept
//! by `Client::clear`.

pub mod cache;
pub mod observer;

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::error::QueryError;
use crate::notify::NotifyManager;
use crate::online::OnlineTracker;
use crate::retry::{NetworkMode, RetryConfig, RetryHooks, Retryer};

/// Unique id for one mutation run, also used to key its optimistic snapshot
/// in [`crate::optimistic::OptimisticManager`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutationId(Uuid);

impl MutationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MutationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MutationId({})", self.0)
    }
}

/// Coarse lifecycle (mirrors `status` in the source).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationStatus {
    Idle,
    Loading,
    Success,
    Error,
}

/// Snapshot of a mutation's data/error/lifecycle state (§4.8).
pub struct MutationState<TData> {
    pub status: MutationStatus,
    pub data: Option<Arc<TData>>,
    pub error: Option<QueryError>,
    pub is_paused: bool,
    pub failure_count: u32,
    pub failure_reason: Option<QueryError>,
    pub submitted_at: Option<Instant>,
}

impl<TData> Clone for MutationState<TData> {
    fn clone(&self) -> Self {
        Self {
            status: self.status,
            data: self.data.clone(),
            error: self.error.clone(),
            is_paused: self.is_paused,
            failure_count: self.failure_count,
            failure_reason: self.failure_reason.clone(),
            submitted_at: self.submitted_at,
        }
    }
}

impl<TData> Default for MutationState<TData> {
    fn default() -> Self {
        Self {
            status: MutationStatus::Idle,
            data: None,
            error: None,
            is_paused: false,
            failure_count: 0,
            failure_reason: None,
            submitted_at: None,
        }
    }
}

/// `mutationFn(vars)`, run under the Retryer like a fetcher (§4.8 step 2).
pub type MutationFn<TVars, TData> = Arc<dyn Fn(TVars) -> BoxFuture<'static, Result<TData, QueryError>> + Send + Sync>;

/// Mutation lifecycle hooks (§4.8 steps 1/3/4). Kept synchronous, like the
/// fetch-time reducers on `Entry`: a hook that needs to await something
/// (an optimistic cache write, say) does so before returning `Some(context)`
/// by running on the same executor that drives `Mutation::execute`'s caller.
pub struct MutationOptions<TVars, TData, TContext> {
    pub retry: RetryConfig,
    pub on_mutate: Option<Arc<dyn Fn(&TVars) -> Option<TContext> + Send + Sync>>,
    pub on_success: Option<Arc<dyn Fn(&TData, &TVars, Option<&TContext>) + Send + Sync>>,
    pub on_error: Option<Arc<dyn Fn(&QueryError, &TVars, Option<&TContext>) + Send + Sync>>,
    pub on_settled:
        Option<Arc<dyn Fn(Option<&TData>, Option<&QueryError>, &TVars, Option<&TContext>) + Send + Sync>>,
}

impl<TVars, TData, TContext> Clone for MutationOptions<TVars, TData, TContext> {
    fn clone(&self) -> Self {
        Self {
            retry: self.retry.clone(),
            on_mutate: self.on_mutate.clone(),
            on_success: self.on_success.clone(),
            on_error: self.on_error.clone(),
            on_settled: self.on_settled.clone(),
        }
    }
}

impl<TVars, TData, TContext> Default for MutationOptions<TVars, TData, TContext> {
    fn default() -> Self {
        Self {
            retry: RetryConfig {
                retry: crate::retry::Retry::Never,
                network_mode: NetworkMode::Online,
                ..RetryConfig::default()
            },
            on_mutate: None,
            on_success: None,
            on_error: None,
            on_settled: None,
        }
    }
}

type StateListener<TData> = Arc<dyn Fn(&MutationState<TData>) + Send + Sync>;

struct MutationInner<TData> {
    id: MutationId,
    sequence: u32,
    state: Mutex<MutationState<TData>>,
    notify: NotifyManager,
    listeners: Mutex<Vec<StateListener<TData>>>,
    cancel: CancelToken,
    /// Set for the duration of `execute`'s retry loop so `resume()` can wake
    /// a network-paused attempt; `settled` carries one permit, fired exactly
    /// once when `execute` finishes, so a `resume()` call always observes
    /// either an already-running or an already-settled mutation correctly.
    retryer: Mutex<Option<Arc<Retryer>>>,
    settled: Arc<tokio::sync::Notify>,
}

/// One in-flight (or settled) mutation run. Cheap to clone; clones observe
/// the same state.
pub struct Mutation<TVars, TData, TContext> {
    inner: Arc<MutationInner<TData>>,
    mutation_fn: MutationFn<TVars, TData>,
    options: MutationOptions<TVars, TData, TContext>,
    online: Arc<OnlineTracker>,
}

impl<TVars, TData, TContext> Clone for Mutation<TVars, TData, TContext> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            mutation_fn: self.mutation_fn.clone(),
            options: self.options.clone(),
            online: self.online.clone(),
        }
    }
}

impl<TVars, TData, TContext> Mutation<TVars, TData, TContext>
where
    TVars: Clone + Send + Sync + 'static,
    TData: Send + Sync + 'static,
    TContext: Send + Sync + 'static,
{
    pub fn new(
        mutation_fn: MutationFn<TVars, TData>,
        options: MutationOptions<TVars, TData, TContext>,
        online: Arc<OnlineTracker>,
    ) -> Self {
        Self {
            inner: Arc::new(MutationInner {
                id: MutationId::new(),
                sequence: crate::mutation::next_sequence(),
                state: Mutex::new(MutationState::default()),
                notify: NotifyManager::new(),
                listeners: Mutex::new(Vec::new()),
                cancel: CancelToken::new(),
                retryer: Mutex::new(None),
                settled: Arc::new(tokio::sync::Notify::new()),
            }),
            mutation_fn,
            options,
            online,
        }
    }

    pub fn id(&self) -> MutationId {
        self.inner.id
    }

    /// Insertion order among mutations in the same `MutationCache`, used to
    /// resume paused mutations FIFO (§4.8, §5).
    pub fn sequence(&self) -> u32 {
        self.inner.sequence
    }

    /// Wakes a network-paused attempt early, then waits for `execute` to
    /// settle. A no-op wait if the mutation was never paused or already
    /// finished (§4.8 `resumePausedMutations`).
    pub async fn resume(&self) {
        if let Some(retryer) = self.inner.retryer.lock().clone() {
            retryer.continue_retry();
        }
        self.inner.settled.notified().await;
    }

    pub fn state(&self) -> MutationState<TData> {
        self.inner.state.lock().clone()
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state.lock().is_paused
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.inner.cancel
    }

    pub fn subscribe(&self, listener: impl Fn(&MutationState<TData>) + Send + Sync + 'static) {
        self.inner.listeners.lock().push(Arc::new(listener));
    }

    fn notify(&self, state: MutationState<TData>) {
        let listeners: Vec<StateListener<TData>> = self.inner.listeners.lock().clone();
        self.inner.notify.batch(|| {
            for listener in &listeners {
                listener(&state);
            }
        });
    }

    /// Runs the mutation through `onMutate` → retried `mutationFn` →
    /// success/error → `onSettled` (§4.8 steps 1-4).
    pub async fn execute(&self, vars: TVars) -> Result<Arc<TData>, QueryError> {
        let context = {
            let mut state = self.inner.state.lock();
            state.status = MutationStatus::Loading;
            state.submitted_at = Some(Instant::now());
            state.clone()
        };
        self.notify(context);
        let context = self.options.on_mutate.as_ref().and_then(|f| f(&vars));

        let retryer = Retryer::new(self.inner.cancel.clone(), self.online.clone());
        *self.inner.retryer.lock() = Some(retryer.clone());
        let inner = self.inner.clone();
        let hooks = RetryHooks {
            on_fail: Some(Arc::new({
                let inner = inner.clone();
                move |attempt, error| {
                    let mut state = inner.state.lock();
                    state.failure_count = attempt;
                    state.failure_reason = Some(error.clone());
                }
            })),
            on_pause: Some(Arc::new({
                let inner = inner.clone();
                move || {
                    inner.state.lock().is_paused = true;
                }
            })),
            on_continue: Some(Arc::new({
                let inner = inner.clone();
                move || {
                    inner.state.lock().is_paused = false;
                }
            })),
        };

        let mutation_fn = self.mutation_fn.clone();
        let result = retryer
            .run_with_hooks(&self.options.retry, &hooks, {
                let vars = vars.clone();
                move |_attempt| mutation_fn(vars.clone())
            })
            .await
            .map(Arc::new);

        let state = {
            let mut state = self.inner.state.lock();
            state.is_paused = false;
            match &result {
                Ok(data) => {
                    state.status = MutationStatus::Success;
                    state.data = Some(data.clone());
                    state.error = None;
                }
                Err(error) => {
                    state.status = MutationStatus::Error;
                    state.error = Some(error.clone());
                }
            }
            state.clone()
        };
        self.notify(state);

        match &result {
            Ok(data) => {
                if let Some(on_success) = &self.options.on_success {
                    on_success(data, &vars, context.as_ref());
                }
                if let Some(on_settled) = &self.options.on_settled {
                    on_settled(Some(data), None, &vars, context.as_ref());
                }
            }
            Err(error) => {
                if let Some(on_error) = &self.options.on_error {
                    on_error(error, &vars, context.as_ref());
                }
                if let Some(on_settled) = &self.options.on_settled {
                    on_settled(None, Some(error), &vars, context.as_ref());
                }
            }
        }

        *self.inner.retryer.lock() = None;
        self.inner.settled.notify_one();
        result
    }
}

/// Atomic counter backing `MutationCache`'s insertion ordering (§4.8, §5
/// "Mutation resume is strictly sequential in insertion order").
pub(crate) static NEXT_SEQUENCE: AtomicU32 = AtomicU32::new(0);

pub(crate) fn next_sequence() -> u32 {
    NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// Type-erased view of a `Mutation` for storage in `MutationCache` (mirrors
/// `EntryDyn`, §3).
#[async_trait::async_trait]
pub trait MutationDyn: Send + Sync {
    fn id(&self) -> MutationId;
    fn sequence(&self) -> u32;
    fn is_paused(&self) -> bool;
    /// Whether this mutation's run hasn't settled yet (`Client::isMutating`, §6).
    fn is_loading(&self) -> bool;
    async fn resume(&self);
}

#[async_trait::async_trait]
impl<TVars, TData, TContext> MutationDyn for Mutation<TVars, TData, TContext>
where
    TVars: Clone + Send + Sync + 'static,
    TData: Send + Sync + 'static,
    TContext: Send + Sync + 'static,
{
    fn id(&self) -> MutationId {
        Mutation::id(self)
    }

    fn sequence(&self) -> u32 {
        Mutation::sequence(self)
    }

    fn is_paused(&self) -> bool {
        Mutation::is_paused(self)
    }

    fn is_loading(&self) -> bool {
        Mutation::state(self).status == MutationStatus::Loading
    }

    async fn resume(&self) {
        Mutation::resume(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    fn test_mutation() -> Mutation<u32, u32, ()> {
        let mutation_fn: MutationFn<u32, u32> = Arc::new(|vars| async move { Ok(vars * 2) }.boxed());
        Mutation::new(mutation_fn, MutationOptions::default(), Arc::new(OnlineTracker::new()))
    }

    #[tokio::test]
    async fn execute_resolves_and_updates_state() {
        let mutation = test_mutation();
        let result = mutation.execute(21).await.unwrap();
        assert_eq!(*result, 42);
        let state = mutation.state();
        assert_eq!(state.status, MutationStatus::Success);
        assert_eq!(*state.data.unwrap(), 42);
    }

    #[tokio::test]
    async fn hooks_fire_in_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mutation_fn: MutationFn<u32, u32> = Arc::new(|vars| async move { Ok(vars) }.boxed());
        let mut options = MutationOptions::default();
        options.on_mutate = Some(Arc::new({
            let calls = calls.clone();
            move |_| {
                calls.lock().push("mutate");
                None
            }
        }));
        options.on_success = Some(Arc::new({
            let calls = calls.clone();
            move |_, _, _| calls.lock().push("success")
        }));
        options.on_settled = Some(Arc::new({
            let calls = calls.clone();
            move |_, _, _, _| calls.lock().push("settled")
        }));
        let mutation = Mutation::new(mutation_fn, options, Arc::new(OnlineTracker::new()));
        mutation.execute(1).await.unwrap();
        assert_eq!(*calls.lock(), vec!["mutate", "success", "settled"]);
    }

    #[tokio::test]
    async fn failing_mutation_calls_error_then_settled() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mutation_fn: MutationFn<u32, u32> = Arc::new(|_| async { Err(QueryError::custom("nope")) }.boxed());
        let mut options: MutationOptions<u32, u32, ()> = MutationOptions::default();
        options.on_error = Some(Arc::new({
            let calls = calls.clone();
            move |_, _, _| calls.lock().push("error")
        }));
        options.on_settled = Some(Arc::new({
            let calls = calls.clone();
            move |_, _, _, _| calls.lock().push("settled")
        }));
        let mutation = Mutation::new(mutation_fn, options, Arc::new(OnlineTracker::new()));
        let result = mutation.execute(1).await;
        assert!(result.is_err());
        assert_eq!(mutation.state().status, MutationStatus::Error);
        assert_eq!(*calls.lock(), vec!["error", "settled"]);
    }
}
