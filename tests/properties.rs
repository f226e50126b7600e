//! Property tests for the invariants `key::Key` hashing/matching and
//! `sharing::share` are supposed to hold for every input, not just the
//! handful of fixed examples the inline unit tests cover.

use std::collections::BTreeMap;
use std::sync::Arc;

use proptest::prelude::*;
use query_cache::{share, IntoKey, Key, SharingMode};

/// A small alphabet of JSON-safe strings, wide enough to matter but narrow
/// enough that proptest's shrinker converges quickly.
fn segment_strategy() -> impl Strategy<Value = String> {
    "[a-z]{1,8}"
}

fn object_strategy() -> impl Strategy<Value = BTreeMap<String, i64>> {
    prop::collection::btree_map(segment_strategy(), any::<i64>(), 0..6)
}

proptest! {
    /// Hashing the same key twice always yields the same hash (§3): the
    /// cache relies on this to look up an entry it created moments ago.
    #[test]
    fn hash_is_deterministic(segments in prop::collection::vec(segment_strategy(), 0..6)) {
        let key: Key = segments.clone().into_key();
        prop_assert_eq!(key.hash(), key.into_key().hash());
        let again: Key = segments.into_key();
        prop_assert_eq!(again.hash(), again.hash());
    }

    /// Two keys built from the same object, inserted in different orders,
    /// hash identically (§3: canonical JSON sorts object keys recursively).
    #[test]
    fn hash_is_order_independent_for_object_segments(entries in object_strategy()) {
        let mut forward = serde_json::Map::new();
        for (k, v) in entries.iter() {
            forward.insert(k.clone(), serde_json::Value::from(*v));
        }
        let mut reversed = serde_json::Map::new();
        for (k, v) in entries.iter().rev() {
            reversed.insert(k.clone(), serde_json::Value::from(*v));
        }

        let a = Key::new([serde_json::Value::Object(forward)]);
        let b = Key::new([serde_json::Value::Object(reversed)]);
        prop_assert_eq!(a.hash(), b.hash());
    }

    /// `partial_match` is reflexive for any key (§4.4): a filter built from
    /// an entry's own key must always match that entry.
    #[test]
    fn partial_match_is_reflexive(entries in object_strategy()) {
        let mut map = serde_json::Map::new();
        for (k, v) in entries.iter() {
            map.insert(k.clone(), serde_json::Value::from(*v));
        }
        let key = Key::new([serde_json::Value::Object(map)]);
        prop_assert!(key.partial_match(&key));
    }

    /// A key built from a subset of another's object fields always partially
    /// matches the superset (§4.4 monotonicity): removing fields from a
    /// filter can only make it match more keys, never fewer.
    #[test]
    fn partial_match_is_monotone_under_field_removal(
        entries in object_strategy(),
        drop_count in 0usize..6,
    ) {
        let mut full_map = serde_json::Map::new();
        for (k, v) in entries.iter() {
            full_map.insert(k.clone(), serde_json::Value::from(*v));
        }
        let full = Key::new([serde_json::Value::Object(full_map.clone())]);

        let keep = full_map.len().saturating_sub(drop_count.min(full_map.len()));
        let subset_map: serde_json::Map<String, serde_json::Value> = full_map.into_iter().take(keep).collect();
        let subset = Key::new([serde_json::Value::Object(subset_map)]);

        prop_assert!(full.partial_match(&subset));
    }

    /// `exact_match` implies `partial_match` for arbitrary keys (§4.4): an
    /// exact-match filter is always a special case of a partial-match one.
    #[test]
    fn exact_match_implies_partial_match(
        a_entries in object_strategy(),
        b_entries in object_strategy(),
    ) {
        let mut a_map = serde_json::Map::new();
        for (k, v) in a_entries.iter() {
            a_map.insert(k.clone(), serde_json::Value::from(*v));
        }
        let mut b_map = serde_json::Map::new();
        for (k, v) in b_entries.iter() {
            b_map.insert(k.clone(), serde_json::Value::from(*v));
        }
        let a = Key::new([serde_json::Value::Object(a_map)]);
        let b = Key::new([serde_json::Value::Object(b_map)]);
        if a.exact_match(&b) {
            prop_assert!(a.partial_match(&b));
        }
    }

    /// `share` preserves `Arc` identity whenever the freshly produced value
    /// compares equal to the previous one, for any integer payload, and
    /// always allocates fresh when they differ (§4.9).
    #[test]
    fn share_preserves_identity_iff_equal(prev in any::<i64>(), next in any::<i64>()) {
        let previous = Arc::new(prev);
        let shared = share(Some(&previous), next, SharingMode::Enabled);
        if prev == next {
            prop_assert!(Arc::ptr_eq(&previous, &shared));
        } else {
            prop_assert!(!Arc::ptr_eq(&previous, &shared));
        }
        prop_assert_eq!(*shared, next);
    }

    /// With structural sharing disabled, `share` never reuses the previous
    /// `Arc`, even for an equal value (§4.9, §9.1 opt-out).
    #[test]
    fn share_disabled_never_reuses_arc(value in any::<i64>()) {
        let previous = Arc::new(value);
        let shared = share(Some(&previous), value, SharingMode::Disabled);
        prop_assert!(!Arc::ptr_eq(&previous, &shared));
        prop_assert_eq!(*shared, value);
    }
}

mod client_round_trip {
    use query_cache::{Client, ClientConfig, IntoKey};

    proptest::proptest! {
        /// Writing a value through `Client::set_data` and reading it back via
        /// `Client::get_data` always returns what was written (§4.11
        /// `setQueryData`/`getQueryData` round-trip).
        #[test]
        fn set_then_get_round_trips(value in proptest::prelude::any::<i64>()) {
            let client = Client::new(ClientConfig::default());
            let key = "k".into_key();
            client.set_data::<i64>(key.clone(), |_| value, None);
            proptest::prop_assert_eq!(*client.get_data::<i64>(key).unwrap(), value);
        }

        /// Re-reading a value twice in a row (no intervening write) returns
        /// the identical `Arc`, not merely an equal one (§4.9: a read alone
        /// never triggers a fresh allocation).
        #[test]
        fn repeated_get_returns_identical_arc(value in proptest::prelude::any::<i64>()) {
            let client = Client::new(ClientConfig::default());
            let key = "k".into_key();
            client.set_data::<i64>(key.clone(), |_| value, None);
            let first = client.get_data::<i64>(key.clone()).unwrap();
            let second = client.get_data::<i64>(key).unwrap();
            proptest::prop_assert!(std::sync::Arc::ptr_eq(&first, &second));
        }
    }
}
