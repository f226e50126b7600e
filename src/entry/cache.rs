//! `EntryCache`: the keyed map of every known `Entry`, plus cross-entry
//! filtering and invalidation (§3, §4.4).

use std::any::Any;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::entry::{Entry, EntryDyn, EntryOptions};
use crate::key::{IntoKey, Key, KeyHash};
use crate::logger::Logger;
use crate::online::OnlineTracker;

/// Selects a subset of entries for invalidate/remove/refetch-style bulk ops
/// (§4.4). `key`+`exact` mirror the source's `queryKey`/`exact` filter pair;
/// `predicate` covers the rest (stale-only, active-only, etc).
#[derive(Clone, Default)]
pub struct EntryFilter {
    pub key: Option<Key>,
    pub exact: bool,
    pub stale_only: bool,
    pub active_only: Option<bool>,
}

impl EntryFilter {
    pub fn matching(key: impl IntoKey) -> Self {
        Self {
            key: Some(key.into_key()),
            ..Default::default()
        }
    }

    pub fn exact(mut self) -> Self {
        self.exact = true;
        self
    }

    pub fn stale_only(mut self) -> Self {
        self.stale_only = true;
        self
    }

    pub fn active_only(mut self, active: bool) -> Self {
        self.active_only = Some(active);
        self
    }

    fn matches(&self, entry: &dyn EntryDyn) -> bool {
        if let Some(filter_key) = &self.key {
            let matches_key = if self.exact {
                entry.key().exact_match(filter_key)
            } else {
                entry.key().partial_match(filter_key)
            };
            if !matches_key {
                return false;
            }
        }
        if self.stale_only && !entry.is_stale() {
            return false;
        }
        if let Some(active) = self.active_only {
            let is_active = entry.observer_count() > 0;
            if is_active != active {
                return false;
            }
        }
        true
    }
}

pub struct EntryCache {
    entries: RwLock<std::collections::HashMap<KeyHash, Arc<dyn EntryDyn>>>,
    default_options: RwLock<EntryOptions>,
    online: Arc<OnlineTracker>,
    logger: Arc<dyn Logger>,
}

impl EntryCache {
    pub fn new(online: Arc<OnlineTracker>, logger: Arc<dyn Logger>) -> Arc<Self> {
        Arc::new(Self {
            entries: RwLock::new(std::collections::HashMap::new()),
            default_options: RwLock::new(EntryOptions::default()),
            online,
            logger,
        })
    }

    pub fn set_default_options(&self, options: EntryOptions) {
        *self.default_options.write() = options;
    }

    pub fn default_options(&self) -> EntryOptions {
        self.default_options.read().clone()
    }

    /// Looks up a typed entry by key, creating it with `default_options` (or
    /// the caller-supplied override) if absent.
    pub fn get_or_create<T: Send + Sync + PartialEq + serde::Serialize + serde::de::DeserializeOwned + 'static>(
        self: &Arc<Self>,
        key: Key,
        options: Option<EntryOptions>,
    ) -> Entry<T> {
        let hash = key.hash();
        if let Some(existing) = self.entries.read().get(&hash) {
            if let Some(typed) = existing.as_any().downcast_ref::<Entry<T>>() {
                return typed.clone();
            }
            self.logger
                .warn(&format!("type mismatch for cache key {hash}; replacing stored entry"));
        }

        let cache = Arc::clone(self);
        let on_gc: Arc<dyn Fn(&KeyHash) + Send + Sync> = Arc::new(move |hash: &KeyHash| {
            cache.entries.write().remove(hash);
        });

        let entry = Entry::new(
            key,
            options.unwrap_or_else(|| self.default_options()),
            self.online.clone(),
            self.logger.clone(),
            on_gc,
        );
        self.entries.write().insert(hash, Arc::new(entry.clone()));
        entry
    }

    pub fn get<T: Send + Sync + PartialEq + serde::Serialize + serde::de::DeserializeOwned + 'static>(&self, key: &Key) -> Option<Entry<T>> {
        self.entries
            .read()
            .get(&key.hash())
            .and_then(|entry| entry.as_any().downcast_ref::<Entry<T>>())
            .cloned()
    }

    pub fn get_by_hash_dyn(&self, hash: &KeyHash) -> Option<Arc<dyn EntryDyn>> {
        self.entries.read().get(hash).cloned()
    }

    pub fn remove(&self, hash: &KeyHash) {
        self.entries.write().remove(hash);
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// All entries matching `filter` (§4.4).
    pub fn find_all(&self, filter: &EntryFilter) -> Vec<Arc<dyn EntryDyn>> {
        self.entries
            .read()
            .values()
            .filter(|entry| filter.matches(entry.as_ref()))
            .cloned()
            .collect()
    }

    pub fn find_one(&self, filter: &EntryFilter) -> Option<Arc<dyn EntryDyn>> {
        self.entries.read().values().find(|entry| filter.matches(entry.as_ref())).cloned()
    }

    /// Marks every matching entry invalidated (§4.4 `invalidateQueries`).
    pub fn invalidate(&self, filter: &EntryFilter) {
        for entry in self.find_all(filter) {
            entry.invalidate();
        }
    }

    /// Cancels in-flight fetches for every matching entry (§4.4 `cancelQueries`).
    pub fn cancel(&self, filter: &EntryFilter, revert: bool, silent: bool) {
        for entry in self.find_all(filter) {
            entry.cancel_fetch(revert, silent);
        }
    }

    /// Removes every matching entry outright (§4.4 `removeQueries`).
    pub fn remove_matching(&self, filter: &EntryFilter) {
        let hashes: Vec<KeyHash> = self
            .entries
            .read()
            .iter()
            .filter(|(_, entry)| filter.matches(entry.as_ref()))
            .map(|(hash, _)| hash.clone())
            .collect();
        let mut entries = self.entries.write();
        for hash in hashes {
            entries.remove(&hash);
        }
    }

    pub fn is_fetching(&self, filter: &EntryFilter) -> usize {
        self.find_all(filter).iter().filter(|e| e.is_fetching()).count()
    }
}
