//! `MultiEntryObserver<T>`: one subscription across a dynamic list of
//! per-entry option sets (§4.7), e.g. "one row per id in this list", each row
//! free to carry its own `select`/`enabled`/`keepPreviousData`/etc. When the
//! list changes, observers are reused by key hash wherever possible instead
//! of tearing every one down and rebuilding it; a new slot with no hash match
//! can still borrow placeholder data positionally from whatever prior
//! observer fell out of the list at the same unmatched position.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::entry::cache::EntryCache;
use crate::entry::Fetcher;
use crate::focus::FocusTracker;
use crate::key::{Key, KeyHash};
use crate::observer::{EntryObserver, EntryResult, ObserverOptions};
use crate::online::OnlineTracker;

type ResultsListener<T> = Arc<dyn Fn(&[EntryResult<T>]) + Send + Sync>;

struct Slot<T> {
    key_hash: KeyHash,
    observer: EntryObserver<T>,
    subscription_id: u64,
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            key_hash: self.key_hash.clone(),
            observer: self.observer.clone(),
            subscription_id: self.subscription_id,
        }
    }
}

pub struct MultiEntryObserver<T> {
    cache: Arc<EntryCache>,
    fetcher: Fetcher<T>,
    slots: Mutex<Vec<Slot<T>>>,
    results: Mutex<Vec<EntryResult<T>>>,
    listeners: Mutex<Vec<(u64, ResultsListener<T>)>>,
    next_listener_id: std::sync::atomic::AtomicU64,
}

impl<T: Send + Sync + PartialEq + serde::Serialize + serde::de::DeserializeOwned + 'static> MultiEntryObserver<T> {
    pub fn new(cache: Arc<EntryCache>, fetcher: Fetcher<T>) -> Arc<Self> {
        Arc::new(Self {
            cache,
            fetcher,
            slots: Mutex::new(Vec::new()),
            results: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: std::sync::atomic::AtomicU64::new(0),
        })
    }

    pub fn subscribe(self: &Arc<Self>, listener: impl Fn(&[EntryResult<T>]) + Send + Sync + 'static) -> u64 {
        let id = self.next_listener_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe_listener(&self, id: u64) {
        self.listeners.lock().retain(|(lid, _)| *lid != id);
    }

    pub fn results(&self) -> Vec<EntryResult<T>> {
        self.results.lock().clone()
    }

    /// Replaces the watched list of (key, option set) pairs (§4.7
    /// `setEntries`):
    /// 1. Greedily match each new option set to an existing observer by key
    ///    hash and reuse it in place, calling `set_options` with the fresh
    ///    option set (steps 2, 6).
    /// 2. Whatever's left unmatched on both sides — new option sets with no
    ///    hash match, and prior observers nobody claimed — pair up
    ///    positionally, in list order (steps 3, 4): if the unmatched new
    ///    option set has `keep_previous_data`, the new observer is seeded
    ///    with the positionally-paired prior observer's last result as
    ///    placeholder data before its own fetch has even started. Rust's
    ///    `Entry<T>` is keyed to one type-erased cache slot, so "adopt that
    ///    observer temporarily" is realized as seeding rather than literally
    ///    keeping the old observer alive under the new key.
    /// 3. Every prior observer that was never reused (consumed as a
    ///    placeholder donor or not) is unsubscribed (step 7); the merged list
    ///    keeps the new call's order (step 5).
    pub fn set_entries(self: &Arc<Self>, entries: Vec<(Key, ObserverOptions<T>)>, focus: &FocusTracker, online: &OnlineTracker) {
        let old_slots: Vec<Slot<T>> = self.slots.lock().drain(..).collect();

        let mut by_hash: HashMap<KeyHash, VecDeque<usize>> = HashMap::new();
        for (i, slot) in old_slots.iter().enumerate() {
            by_hash.entry(slot.key_hash.clone()).or_default().push_back(i);
        }

        enum Resolved<T> {
            Reused(Slot<T>),
            Pending { key: Key, hash: KeyHash, options: ObserverOptions<T> },
        }

        let mut matched: HashSet<usize> = HashSet::new();
        let mut resolved: Vec<Resolved<T>> = Vec::with_capacity(entries.len());
        for (key, options) in entries {
            let hash = key.hash();
            match by_hash.get_mut(&hash).and_then(VecDeque::pop_front) {
                Some(i) => {
                    matched.insert(i);
                    let reused = old_slots[i].clone();
                    reused.observer.set_options(options);
                    resolved.push(Resolved::Reused(reused));
                }
                None => resolved.push(Resolved::Pending { key, hash, options }),
            }
        }

        // Prior observers nobody claimed by hash, in their original relative
        // order — the donor pool for positional `keep_previous_data` adoption.
        let mut unmatched_old = old_slots.iter().enumerate().filter(|(i, _)| !matched.contains(i)).map(|(_, slot)| slot.clone());

        let mut new_slots = Vec::with_capacity(resolved.len());
        for item in resolved {
            let slot = match item {
                Resolved::Reused(slot) => slot,
                Resolved::Pending { key, hash, options } => {
                    // Always advance the donor iterator, even when this slot
                    // doesn't want the data, so slot N of the unmatched new
                    // list stays paired with slot N of the unmatched old list.
                    let donor = unmatched_old.next();
                    let placeholder = if options.keep_previous_data {
                        donor.and_then(|slot| slot.observer.get_current_result().data)
                    } else {
                        None
                    };

                    let entry = self.cache.get_or_create::<T>(key, None);
                    let observer = EntryObserver::new(entry, self.fetcher.clone(), options);
                    if let Some(data) = placeholder {
                        observer.seed_previous_data(data);
                    }

                    let this = self.clone();
                    let slot_hash = hash.clone();
                    let subscription_id = observer.subscribe(focus, online, move |result| {
                        this.on_slot_result(slot_hash.clone(), result);
                    });
                    Slot {
                        key_hash: hash,
                        observer,
                        subscription_id,
                    }
                }
            };
            new_slots.push(slot);
        }

        // Anything never reused fell out of the new entry list for good.
        for (i, slot) in old_slots.into_iter().enumerate() {
            if !matched.contains(&i) {
                slot.observer.unsubscribe(slot.subscription_id);
            }
        }

        let initial_results: Vec<EntryResult<T>> = new_slots.iter().map(|slot| slot.observer.get_current_result()).collect();
        *self.results.lock() = initial_results;
        *self.slots.lock() = new_slots;
        self.notify();
    }

    /// Looks up `hash`'s current position at notify time rather than trusting
    /// a position captured when the observer was created, so a reused
    /// observer that moved slots between `set_entries` calls still writes
    /// into the right index (§4.7 "in-place replace-at-index").
    fn on_slot_result(self: &Arc<Self>, hash: KeyHash, result: &EntryResult<T>) {
        let position = self.slots.lock().iter().position(|slot| slot.key_hash == hash);
        if let Some(position) = position {
            let mut results = self.results.lock();
            if position < results.len() {
                results[position] = result.clone();
            }
        }
        self.notify();
    }

    fn notify(self: &Arc<Self>) {
        let results = self.results.lock().clone();
        let listeners: Vec<ResultsListener<T>> = self.listeners.lock().iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            listener(&results);
        }
    }

    pub fn unsubscribe_all(&self) {
        for slot in self.slots.lock().drain(..) {
            slot.observer.unsubscribe(slot.subscription_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::default_logger;

    fn opts<T>() -> ObserverOptions<T> {
        ObserverOptions::default()
    }

    #[tokio::test]
    async fn reuses_observers_present_in_both_lists() {
        let cache = EntryCache::new(Arc::new(OnlineTracker::new()), default_logger());
        let fetcher: Fetcher<u32> = Arc::new(|ctx| {
            Box::pin(async move {
                let n: u32 = ctx.key.segments()[0].as_u64().unwrap_or(0) as u32;
                Ok(n * 100)
            })
        });
        let multi = MultiEntryObserver::new(cache.clone(), fetcher);
        let focus = FocusTracker::new();
        let online = OnlineTracker::new();

        multi.set_entries(vec![(1.into_key_num(), opts()), (2.into_key_num(), opts())], &focus, &online);
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert_eq!(multi.results().len(), 2);

        multi.set_entries(vec![(2.into_key_num(), opts()), (3.into_key_num(), opts())], &focus, &online);
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        let results = multi.results();
        assert_eq!(results.len(), 2);
        assert_eq!(*results[0].data.clone().unwrap(), 200);
    }

    /// §8 scenario 6: switching `[a, b]` to `[a, c]` with `keep_previous_data`
    /// set on the second slot makes that slot report `b`'s old data with
    /// `is_placeholder_data = true` immediately, before `c`'s own fetch has
    /// had any chance to run (checked before the first `.await`).
    #[tokio::test]
    async fn keep_previous_data_adopts_positionally_on_reorder() {
        let cache = EntryCache::new(Arc::new(OnlineTracker::new()), default_logger());
        let fetcher: Fetcher<u32> = Arc::new(|ctx| {
            Box::pin(async move {
                let n: u32 = ctx.key.segments()[0].as_u64().unwrap_or(0) as u32;
                Ok(n * 100)
            })
        });
        let multi = MultiEntryObserver::new(cache.clone(), fetcher);
        let focus = FocusTracker::new();
        let online = OnlineTracker::new();

        multi.set_entries(vec![(1.into_key_num(), opts()), (2.into_key_num(), opts())], &focus, &online);
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert_eq!(*multi.results()[1].data.clone().unwrap(), 200);

        let mut second = opts();
        second.keep_previous_data = true;
        multi.set_entries(vec![(1.into_key_num(), opts()), (4.into_key_num(), second)], &focus, &online);

        // Synchronous: the fresh observer for key 4 hasn't had a chance to
        // fetch yet, but its result should already carry key 2's old data.
        let results = multi.results();
        assert_eq!(*results[1].data.clone().unwrap(), 200);
        assert!(results[1].is_placeholder_data);

        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        let results = multi.results();
        assert_eq!(*results[1].data.clone().unwrap(), 400);
        assert!(!results[1].is_placeholder_data);
    }

    trait IntoKeyNum {
        fn into_key_num(self) -> Key;
    }
    impl IntoKeyNum for i32 {
        fn into_key_num(self) -> Key {
            Key::new([serde_json::json!(self)])
        }
    }
}
