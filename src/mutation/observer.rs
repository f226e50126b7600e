//! `MutationObserver<TVars, TData, TContext>`: one subscriber's view onto a
//! mutation it owns (§4.8 "Observers of a mutation project its state plus
//! boolean projections and `mutate`/`reset` methods").
//!
//! Unlike `EntryObserver`, a mutation observer doesn't share state with other
//! observers of the same key — each `mutate()` call replaces the underlying
//! `Mutation` with a fresh one, and the observer just re-points its
//! subscription at it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::mutation::{Mutation, MutationFn, MutationOptions, MutationState, MutationStatus};
use crate::online::OnlineTracker;

type StateListener<TData> = Arc<dyn Fn(&MutationState<TData>) + Send + Sync>;

struct ObserverInner<TVars, TData, TContext> {
    mutation_fn: MutationFn<TVars, TData>,
    options: MutationOptions<TVars, TData, TContext>,
    online: Arc<OnlineTracker>,
    current: Mutex<Option<Mutation<TVars, TData, TContext>>>,
    listeners: Mutex<Vec<(u64, StateListener<TData>)>>,
    next_listener_id: AtomicU64,
}

pub struct MutationObserver<TVars, TData, TContext> {
    inner: Arc<ObserverInner<TVars, TData, TContext>>,
}

impl<TVars, TData, TContext> Clone for MutationObserver<TVars, TData, TContext> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<TVars, TData, TContext> MutationObserver<TVars, TData, TContext>
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
            inner: Arc::new(ObserverInner {
                mutation_fn,
                options,
                online,
                current: Mutex::new(None),
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn subscribe(&self, listener: impl Fn(&MutationState<TData>) + Send + Sync + 'static) -> u64 {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        self.inner.listeners.lock().retain(|(lid, _)| *lid != id);
    }

    /// Current mutation's state, or the idle default if none has run yet.
    pub fn result(&self) -> MutationState<TData> {
        match self.inner.current.lock().as_ref() {
            Some(mutation) => mutation.state(),
            None => MutationState::default(),
        }
    }

    pub fn is_loading(&self) -> bool {
        self.result().status == MutationStatus::Loading
    }

    pub fn is_success(&self) -> bool {
        self.result().status == MutationStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.result().status == MutationStatus::Error
    }

    pub fn is_idle(&self) -> bool {
        self.result().status == MutationStatus::Idle
    }

    /// Starts a fresh mutation run, replacing whatever this observer was
    /// previously pointed at, and returns the tracked handle so a caller
    /// (typically `Client::mutate`) can register it with `MutationCache` for
    /// pause/resume bookkeeping.
    pub fn mutate(&self, vars: TVars) -> (Mutation<TVars, TData, TContext>, impl std::future::Future<Output = Result<Arc<TData>, crate::error::QueryError>>)
    {
        let mutation = Mutation::new(
            self.inner.mutation_fn.clone(),
            self.inner.options.clone(),
            self.inner.online.clone(),
        );
        for (_, listener) in self.inner.listeners.lock().iter() {
            mutation.subscribe({
                let listener = listener.clone();
                move |state| listener(state)
            });
        }
        *self.inner.current.lock() = Some(mutation.clone());
        let run = mutation.clone();
        (mutation, async move { run.execute(vars).await })
    }

    /// Drops the current mutation handle, resetting this observer to idle.
    pub fn reset(&self) {
        *self.inner.current.lock() = None;
    }
}
