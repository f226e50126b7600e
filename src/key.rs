//! Query keys, canonical hashing, and partial-match filters (§3, §4.4).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// An ordered, immutable sequence of JSON-serializable values identifying a request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Key(pub Vec<Value>);

impl Key {
    pub fn new(segments: impl IntoIterator<Item = Value>) -> Self {
        Self(segments.into_iter().collect())
    }

    pub fn segments(&self) -> &[Value] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Compute the deterministic hash (§3): canonical JSON with recursively
    /// sorted object keys, arrays kept in order.
    pub fn hash(&self) -> KeyHash {
        let canonical = Value::Array(self.0.iter().map(canonicalize).collect());
        let bytes = serde_json::to_vec(&canonical).expect("Value serialization is infallible");
        let digest = Sha256::digest(&bytes);
        KeyHash(hex(&digest))
    }

    /// `self` matches `other` under recursive structural-subset semantics
    /// (`partialDeepEqual`, §4.4): every key/value that `other` names must be
    /// present and equal (recursively) in `self`.
    pub fn partial_match(&self, other: &Key) -> bool {
        partial_deep_equal(
            &Value::Array(self.0.clone()),
            &Value::Array(other.0.clone()),
        )
    }

    pub fn exact_match(&self, other: &Key) -> bool {
        self.hash() == other.hash()
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.hash() == other.hash()
    }
}
impl Eq for Key {}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, seg) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{seg}")?;
        }
        write!(f, "]")
    }
}

/// Convert any serializable tuple/slice/single value into a `Key`.
pub trait IntoKey {
    fn into_key(self) -> Key;
}

impl IntoKey for Key {
    fn into_key(self) -> Key {
        self
    }
}

impl IntoKey for &str {
    fn into_key(self) -> Key {
        Key::new([Value::String(self.to_string())])
    }
}

impl IntoKey for String {
    fn into_key(self) -> Key {
        Key::new([Value::String(self)])
    }
}

impl<T: Serialize> IntoKey for Vec<T> {
    fn into_key(self) -> Key {
        Key::new(
            self.into_iter()
                .map(|v| serde_json::to_value(v).expect("key segment must serialize")),
        )
    }
}

impl<T: Serialize, const N: usize> IntoKey for [T; N] {
    fn into_key(self) -> Key {
        Key::new(
            self.into_iter()
                .map(|v| serde_json::to_value(v).expect("key segment must serialize")),
        )
    }
}

/// The hash of a [`Key`]; the `EntryCache`'s map is keyed by this (§3, §4.4).
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyHash(pub String);

impl fmt::Display for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Recursively sort object keys so that `{a:1,b:2}` and `{b:2,a:1}` hash identically.
/// Arrays are left in order (§3: "arrays preserve order").
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in entries {
                out.insert(k.clone(), canonicalize(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// `partialDeepEqual(a, b)`: `a === b`, or `a` and `b` are both objects/arrays of the
/// same shape and every field `b` names matches recursively in `a` (§4.4).
pub fn partial_deep_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Object(ao), Value::Object(bo)) => {
            bo.iter().all(|(k, bv)| match ao.get(k) {
                Some(av) => partial_deep_equal(av, bv),
                None => false,
            })
        }
        (Value::Array(aa), Value::Array(ba)) => {
            aa.len() == ba.len() && aa.iter().zip(ba.iter()).all(|(x, y)| partial_deep_equal(x, y))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_is_order_independent_for_objects() {
        let a = Key::new([json!({"a": 1, "b": 2})]);
        let b = Key::new([json!({"b": 2, "a": 1})]);
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn hash_is_order_dependent_for_arrays() {
        let a = Key::new([json!(1), json!(2)]);
        let b = Key::new([json!(2), json!(1)]);
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn hash_equality_matches_canonical_form() {
        let a = Key::new([json!({"x": [1, 2], "y": "z"})]);
        let b = Key::new([json!({"y": "z", "x": [1, 2]})]);
        assert_eq!(a.hash(), b.hash());
        let c = Key::new([json!({"x": [2, 1], "y": "z"})]);
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn exact_implies_partial() {
        let a = Key::new([json!({"a": 1, "b": 2})]);
        let b = Key::new([json!({"a": 1, "b": 2})]);
        assert!(a.exact_match(&b));
        assert!(a.partial_match(&b));
    }

    #[test]
    fn partial_is_reflexive() {
        let a = Key::new(["users".into(), json!(1)]);
        assert!(a.partial_match(&a));
    }

    #[test]
    fn partial_is_monotone_under_subset() {
        let full = Key::new([json!({"a": 1, "b": 2, "c": 3})]);
        let subset = Key::new([json!({"a": 1, "b": 2})]);
        let smaller_subset = Key::new([json!({"a": 1})]);
        assert!(full.partial_match(&subset));
        assert!(full.partial_match(&smaller_subset));
        assert!(subset.partial_match(&smaller_subset));
    }

    #[test]
    fn partial_match_rejects_missing_keys() {
        let a = Key::new([json!({"a": 1})]);
        let b = Key::new([json!({"a": 1, "b": 2})]);
        assert!(!a.partial_match(&b));
    }
}
