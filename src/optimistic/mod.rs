//! Optimistic-update snapshots (§4.3 `revertState`, §4.8 "generalizes directly
//! into the `revertState` snapshot mechanism").
//!
//! A mutation's `on_mutate` hook wants to write optimistic data into the
//! cache before the network round-trip settles, and `on_error` wants to roll
//! that write back if the mutation fails. Rather than have every call site
//! hand-roll a save/restore pair, `OptimisticManager` keeps the pre-image
//! keyed by the mutation id that produced it.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::mutation::MutationId;

type Snapshot = Arc<dyn Any + Send + Sync>;

/// Stores one pre-mutation snapshot per in-flight optimistic update.
pub struct OptimisticManager {
    snapshots: Mutex<HashMap<MutationId, Snapshot>>,
}

impl Default for OptimisticManager {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimisticManager {
    pub fn new() -> Self {
        Self {
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    /// Captures `value` as the pre-image for `id`, to be restored by
    /// [`OptimisticManager::take`] if the mutation fails.
    pub fn snapshot<T: Send + Sync + 'static>(&self, id: MutationId, value: Arc<T>) {
        self.snapshots.lock().insert(id, value as Snapshot);
    }

    /// Removes and downcasts the snapshot captured for `id`, if any.
    pub fn take<T: Send + Sync + 'static>(&self, id: &MutationId) -> Option<Arc<T>> {
        let snapshot = self.snapshots.lock().remove(id)?;
        snapshot.downcast::<T>().ok()
    }

    /// Drops the snapshot for `id` without restoring it (the mutation
    /// succeeded; the optimistic write stands).
    pub fn discard(&self, id: &MutationId) {
        self.snapshots.lock().remove(id);
    }

    pub fn len(&self) -> usize {
        self.snapshots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_round_trips_through_take() {
        let manager = OptimisticManager::new();
        let id = MutationId::new();
        manager.snapshot(id, Arc::new(42u32));
        let restored: Option<Arc<u32>> = manager.take(&id);
        assert_eq!(*restored.unwrap(), 42);
        assert!(manager.is_empty());
    }

    #[test]
    fn discard_drops_without_restoring() {
        let manager = OptimisticManager::new();
        let id = MutationId::new();
        manager.snapshot(id, Arc::new("pre-image".to_string()));
        manager.discard(&id);
        let restored: Option<Arc<String>> = manager.take(&id);
        assert!(restored.is_none());
    }
}
