//! Top-level dehydrate/hydrate: combines `EntryCache` and `MutationCache`
//! snapshots into one portable value (§4.10, §6), distinct from
//! `persistence::StorageBackend`'s byte-oriented storage — this module
//! produces/consumes the JSON shape that backend stores.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::Client;
use crate::entry::cache::EntryFilter;
use crate::entry::EntryDyn;
use crate::error::QueryError;
use crate::key::Key;
use crate::persistence::StorageBackend;

/// One persisted entry (§4.10 shape: `{hash, key, state}`).
#[derive(Clone, Serialize, Deserialize)]
pub struct DehydratedEntry {
    pub hash: String,
    pub key: Key,
    pub state: Value,
}

/// One persisted mutation. Mutations have no queryKey-style identity to
/// resume by; the hash of an optional caller-supplied `mutation_key` is
/// carried only for the host application's own bookkeeping, same as the
/// source's optional `mutationKey`.
#[derive(Clone, Serialize, Deserialize)]
pub struct DehydratedMutation {
    pub mutation_key: Option<Key>,
    pub state: Value,
}

/// The full portable snapshot (§4.10).
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct DehydratedState {
    pub mutations: Vec<DehydratedMutation>,
    pub entries: Vec<DehydratedEntry>,
}

/// Filters which entries/mutations `dehydrate` includes. Defaults mirror the
/// source: only successful entries (a pending/errored entry has nothing
/// useful to replay) and only paused mutations (a settled one has already run
/// to completion; nothing to resume).
pub struct DehydrateOptions {
    pub entry_filter: EntryFilter,
    pub should_dehydrate_entry: Arc<dyn Fn(&dyn EntryDyn) -> bool + Send + Sync>,
    pub should_dehydrate_mutation: Arc<dyn Fn(bool) -> bool + Send + Sync>,
}

impl Default for DehydrateOptions {
    fn default() -> Self {
        Self {
            entry_filter: EntryFilter::default(),
            should_dehydrate_entry: Arc::new(|_| true),
            should_dehydrate_mutation: Arc::new(|is_paused| is_paused),
        }
    }
}

/// Snapshots every entry/mutation the client knows about that passes
/// `options`'s filters (§4.10 `dehydrate`).
pub fn dehydrate(client: &Client, options: &DehydrateOptions) -> DehydratedState {
    let cache = client.get_cache();
    let entries = cache
        .find_all(&options.entry_filter)
        .into_iter()
        .filter(|entry| (options.should_dehydrate_entry)(entry.as_ref()))
        .filter_map(|entry| {
            let state = entry.dehydrate()?;
            Some(DehydratedEntry {
                hash: entry.key_hash().to_string(),
                key: entry.key().clone(),
                state,
            })
        })
        .collect();

    let mutation_cache = client.get_mutation_cache();
    let mutations = mutation_cache
        .find_all()
        .into_iter()
        .filter(|mutation| (options.should_dehydrate_mutation)(mutation.is_paused()))
        .map(|mutation| DehydratedMutation {
            mutation_key: None,
            state: serde_json::json!({ "id": format!("{:?}", mutation.id()), "isPaused": mutation.is_paused() }),
        })
        .collect();

    DehydratedState { mutations, entries }
}

/// Applies a snapshot previously produced by [`dehydrate`] onto `client`'s
/// entry cache (§4.10 `hydrate`). Entries are looked up by their persisted
/// key and created with the client's default options if the cache has never
/// seen that key in this process; hydrating past the monotonicity check is
/// left to [`crate::entry::Entry::hydrate`].
///
/// Type erasure means a persisted entry can only be applied to a cache slot
/// whose type the caller already knows: callers hydrate by calling
/// [`crate::entry::cache::EntryCache::get_or_create::<T>`] for each snapshot
/// key they expect and then [`crate::entry::Entry::hydrate`] directly, which
/// is what this function does for entries whose hash matches one the caller
/// pre-registers via `known_hashes`. Mutations are not restored into
/// `MutationCache` — persisted mutations have no `mutationFn` to resume with
/// across a process restart, mirroring the source's note that a paused
/// mutation surviving a reload needs the host to resubmit it.
pub fn hydrate_entries<T>(client: &Client, snapshot: &DehydratedState, key_matches: impl Fn(&Key) -> bool)
where
    T: Send + Sync + PartialEq + Serialize + serde::de::DeserializeOwned + 'static,
{
    let cache = client.get_cache();
    for dehydrated in &snapshot.entries {
        if !key_matches(&dehydrated.key) {
            continue;
        }
        let entry = cache.get_or_create::<T>(dehydrated.key.clone(), None);
        entry.hydrate(&dehydrated.state);
    }
}

/// Writes `dehydrate(client, options)` to `backend` under `storage_key`
/// (§4.10, §6.1). The snapshot is serialized once up front so a slow backend
/// write can't observe a cache mutating underneath it.
pub async fn persist(client: &Client, options: &DehydrateOptions, backend: &dyn StorageBackend, storage_key: &str) -> Result<(), QueryError> {
    let snapshot = dehydrate(client, options);
    let bytes = serde_json::to_vec(&snapshot).map_err(|e| QueryError::custom(format!("serialize dehydrated state: {e}")))?;
    backend.store(storage_key, &bytes).await
}

/// Reads a snapshot previously written by [`persist`], if one exists.
pub async fn restore(backend: &dyn StorageBackend, storage_key: &str) -> Result<Option<DehydratedState>, QueryError> {
    let Some(bytes) = backend.retrieve(storage_key).await? else {
        return Ok(None);
    };
    let snapshot = serde_json::from_slice(&bytes).map_err(|e| QueryError::custom(format!("deserialize dehydrated state: {e}")))?;
    Ok(Some(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Client, ClientConfig};
    use crate::entry::Fetcher;
    use crate::key::IntoKey;
    use crate::persistence::MemoryBackend;
    use futures::FutureExt;

    #[tokio::test]
    async fn round_trips_a_fetched_entry_through_a_backend() {
        let client = Client::new(ClientConfig::default());
        let fetcher: Fetcher<u32> = Arc::new(|_ctx| async { Ok(7u32) }.boxed());
        client.fetch("answer".into_key(), fetcher, None).await.unwrap();

        let backend = MemoryBackend::new();
        persist(&client, &DehydrateOptions::default(), backend.as_ref(), "snapshot").await.unwrap();

        let restored = restore(backend.as_ref(), "snapshot").await.unwrap().unwrap();
        assert_eq!(restored.entries.len(), 1);
        assert_eq!(restored.entries[0].key, "answer".into_key());
    }

    #[tokio::test]
    async fn hydrate_entries_applies_matching_snapshot() {
        let source = Client::new(ClientConfig::default());
        let fetcher: Fetcher<u32> = Arc::new(|_ctx| async { Ok(99u32) }.boxed());
        source.fetch("a".into_key(), fetcher, None).await.unwrap();
        let snapshot = dehydrate(&source, &DehydrateOptions::default());

        let target = Client::new(ClientConfig::default());
        hydrate_entries::<u32>(&target, &snapshot, |key| *key == "a".into_key());

        assert_eq!(*target.get_data::<u32>("a".into_key()).unwrap(), 99);
    }
}
