//! `MutationCache`: tracks every in-flight/settled `Mutation` so paused ones
//! can be resumed in insertion order and cache-level hooks can observe every
//! mutation regardless of which caller started it (§4.8).

use std::sync::Arc;

use parking_lot::RwLock;

use crate::mutation::{MutationDyn, MutationId};

/// Cache-level hooks installed once, fired for every mutation the cache runs
/// (§4.8 "Cache-level side effects mirror the above"). Kept separate from a
/// single mutation's own `MutationOptions` hooks, which fire first.
#[derive(Clone, Default)]
pub struct MutationCacheHooks {
    pub on_mutate: Option<Arc<dyn Fn(MutationId) + Send + Sync>>,
    pub on_success: Option<Arc<dyn Fn(MutationId) + Send + Sync>>,
    pub on_error: Option<Arc<dyn Fn(MutationId) + Send + Sync>>,
    pub on_settled: Option<Arc<dyn Fn(MutationId) + Send + Sync>>,
}

#[derive(Default)]
pub struct MutationCache {
    mutations: RwLock<Vec<Arc<dyn MutationDyn>>>,
    hooks: RwLock<MutationCacheHooks>,
}

impl MutationCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            mutations: RwLock::new(Vec::new()),
            hooks: RwLock::new(MutationCacheHooks::default()),
        })
    }

    pub fn set_hooks(&self, hooks: MutationCacheHooks) {
        *self.hooks.write() = hooks;
    }

    pub fn hooks(&self) -> MutationCacheHooks {
        self.hooks.read().clone()
    }

    /// Tracks a mutation so it appears in `find_all`/`resume_paused_mutations`.
    pub fn track(&self, mutation: Arc<dyn MutationDyn>) {
        self.mutations.write().push(mutation);
    }

    pub fn remove(&self, id: MutationId) {
        self.mutations.write().retain(|m| m.id() != id);
    }

    pub fn clear(&self) {
        self.mutations.write().clear();
    }

    pub fn len(&self) -> usize {
        self.mutations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.read().is_empty()
    }

    /// All tracked mutations, insertion order (§5).
    pub fn find_all(&self) -> Vec<Arc<dyn MutationDyn>> {
        let mut all: Vec<Arc<dyn MutationDyn>> = self.mutations.read().clone();
        all.sort_by_key(|m| m.sequence());
        all
    }

    /// Resumes every currently-paused mutation strictly sequentially, in the
    /// order they were tracked, awaiting each to settle before waking the
    /// next (§4.8 `resumePausedMutations`).
    pub async fn resume_paused_mutations(&self) {
        for mutation in self.find_all() {
            if mutation.is_paused() {
                mutation.resume().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::{Mutation, MutationFn, MutationOptions};
    use crate::online::OnlineTracker;
    use futures::FutureExt;

    fn tracked_mutation() -> (Arc<Mutation<u32, u32, ()>>, Arc<dyn MutationDyn>) {
        let mutation_fn: MutationFn<u32, u32> = Arc::new(|vars| async move { Ok(vars) }.boxed());
        let mutation = Arc::new(Mutation::new(
            mutation_fn,
            MutationOptions::default(),
            Arc::new(OnlineTracker::new()),
        ));
        let dyn_handle: Arc<dyn MutationDyn> = mutation.clone();
        (mutation, dyn_handle)
    }

    #[test]
    fn tracks_and_removes_mutations() {
        let cache = MutationCache::new();
        let (mutation, dyn_handle) = tracked_mutation();
        cache.track(dyn_handle);
        assert_eq!(cache.len(), 1);
        cache.remove(mutation.id());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn resume_paused_mutations_is_noop_when_nothing_paused() {
        let cache = MutationCache::new();
        let (mutation, dyn_handle) = tracked_mutation();
        cache.track(dyn_handle);
        mutation.execute(7).await.unwrap();
        cache.resume_paused_mutations().await;
    }
}
