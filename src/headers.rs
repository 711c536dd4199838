//! Case-insensitive, order-preserving HTTP header storage.
//!
//! One key maps to one or many values. Keys compare case-insensitively (RFC 7230)
//! while the original spelling is kept for output, so a response configured with
//! `X-Trace` goes out as `X-Trace` and a request header sent as `FOO` can be read
//! back as `foo`.
//!
//! ```rust
//! use test_server::HeaderStorage;
//!
//! let mut headers = HeaderStorage::new();
//! headers.add("Set-Cookie", "a=1");
//! headers.add("set-cookie", "b=2");
//! assert_eq!(headers.get_list("SET-COOKIE"), ["a=1", "b=2"]);
//! assert_eq!(headers.items().count(), 2);
//! ```

use serde::ser::{Serialize, SerializeSeq, Serializer};
use smallvec::SmallVec;
use std::fmt;

/// Maximum inline header keys before heap allocation.
/// Most test exchanges carry well under 16 distinct header names.
pub const MAX_INLINE_HEADERS: usize = 16;

#[derive(Clone, PartialEq, Eq)]
struct HeaderEntry {
    /// Original-case key
    name: String,
    values: SmallVec<[String; 1]>,
}

/// Ordered multimap of header names to values.
///
/// Iteration order is the order in which keys were first stored; values keep
/// their insertion order under each key.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct HeaderStorage {
    entries: SmallVec<[HeaderEntry; MAX_INLINE_HEADERS]>,
}

impl HeaderStorage {
    /// Create an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.name.eq_ignore_ascii_case(key))
    }

    /// Replace every value stored under `key` with `value`.
    ///
    /// An existing key keeps its position but adopts the spelling of `key`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let name = key.into();
        let mut values = SmallVec::new();
        values.push(value.into());
        match self.position(&name) {
            Some(idx) => self.entries[idx] = HeaderEntry { name, values },
            None => self.entries.push(HeaderEntry { name, values }),
        }
    }

    /// Append `value` under `key` without touching existing values.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let name = key.into();
        let value = value.into();
        match self.position(&name) {
            Some(idx) => self.entries[idx].values.push(value),
            None => {
                let mut values = SmallVec::new();
                values.push(value);
                self.entries.push(HeaderEntry { name, values });
            }
        }
    }

    /// First value stored under `key`.
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.position(key)
            .and_then(|idx| self.entries[idx].values.first())
            .map(String::as_str)
    }

    /// All values stored under `key`; empty when the key is absent.
    #[must_use]
    pub fn get_list(&self, key: &str) -> &[String] {
        self.position(key)
            .map(|idx| self.entries[idx].values.as_slice())
            .unwrap_or(&[])
    }

    /// Remove `key` and return its values, or `None` if it was not stored.
    pub fn remove(&mut self, key: &str) -> Option<Vec<String>> {
        let idx = self.position(key)?;
        Some(self.entries.remove(idx).values.into_vec())
    }

    /// Case-insensitive membership test.
    #[inline]
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn count_keys(&self) -> usize {
        self.entries.len()
    }

    /// Number of `(key, value)` pairs, counting every value of a multi-valued key.
    #[must_use]
    pub fn count_items(&self) -> usize {
        self.entries.iter().map(|e| e.values.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flattened `(original_key, value)` pairs in storage order.
    ///
    /// The iterator borrows the storage; call `items()` again to restart.
    #[must_use]
    pub fn items(&self) -> Items<'_> {
        Items {
            entries: self.entries.iter(),
            current: None,
        }
    }
}

/// Iterator returned by [`HeaderStorage::items`].
#[derive(Clone)]
pub struct Items<'a> {
    entries: std::slice::Iter<'a, HeaderEntry>,
    current: Option<(&'a str, std::slice::Iter<'a, String>)>,
}

impl<'a> Iterator for Items<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((name, values)) = self.current.as_mut() {
                if let Some(value) = values.next() {
                    return Some((*name, value.as_str()));
                }
            }
            let entry = self.entries.next()?;
            self.current = Some((entry.name.as_str(), entry.values.iter()));
        }
    }
}

impl<'a> IntoIterator for &'a HeaderStorage {
    type Item = (&'a str, &'a str);
    type IntoIter = Items<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.items()
    }
}

impl<K, V> Extend<(K, V)> for HeaderStorage
where
    K: Into<String>,
    V: Into<String>,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.add(key, value);
        }
    }
}

impl<K, V> FromIterator<(K, V)> for HeaderStorage
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut storage = HeaderStorage::new();
        storage.extend(iter);
        storage
    }
}

impl fmt::Debug for HeaderStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items()).finish()
    }
}

/// Serialized as a list of `[name, value]` pairs so duplicates survive.
impl Serialize for HeaderStorage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.count_items()))?;
        for pair in self.items() {
            seq.serialize_element(&pair)?;
        }
        seq.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_set_get_simple_value() {
        let mut h = HeaderStorage::new();
        h.set("foo", "bar");
        assert_eq!(h.get("foo"), Some("bar"));
        assert_eq!(h.get("FOO"), Some("bar"));
    }

    #[test]
    fn test_add_keeps_all_values() {
        let mut h = HeaderStorage::new();
        h.add("foo", "bar");
        h.add("Foo", "baz");
        assert_eq!(h.get_list("foo"), ["bar", "baz"]);
        assert_eq!(h.get("foo"), Some("bar"));
        assert_eq!(h.count_keys(), 1);
        assert_eq!(h.count_items(), 2);
    }

    #[test]
    fn test_set_replaces_values_and_keeps_position() {
        let mut h: HeaderStorage = [("a", "1"), ("b", "2"), ("a", "3")].into_iter().collect();
        h.set("A", "9");
        let items: Vec<_> = h.items().collect();
        assert_eq!(items, vec![("A", "9"), ("b", "2")]);
    }

    #[test]
    fn test_remove_missing_key() {
        let mut h = HeaderStorage::new();
        assert!(h.remove("foo").is_none());
        h.set("foo", "bar");
        assert_eq!(h.remove("FOO"), Some(vec!["bar".to_string()]));
        assert!(h.remove("foo").is_none());
        assert!(h.is_empty());
    }

    #[test]
    fn test_contains_is_case_insensitive() {
        let h: HeaderStorage = [("Content-Type", "text/plain")].into_iter().collect();
        assert!(h.contains("content-type"));
        assert!(h.contains("CONTENT-TYPE"));
        assert!(!h.contains("server"));
    }

    #[test]
    fn test_items_flatten_in_storage_order_and_restart() {
        let h: HeaderStorage = [("set-cookie", "foo=bar"), ("X-A", "1"), ("set-cookie", "baz=gaz")]
            .into_iter()
            .collect();
        let first: Vec<_> = h.items().collect();
        assert_eq!(
            first,
            vec![
                ("set-cookie", "foo=bar"),
                ("set-cookie", "baz=gaz"),
                ("X-A", "1")
            ]
        );
        let second: Vec<_> = (&h).into_iter().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_extend_from_map() {
        let mut map = HashMap::new();
        map.insert("foo", "bar");
        let mut h = HeaderStorage::new();
        h.extend(map);
        assert_eq!(h.get("foo"), Some("bar"));
    }

    #[test]
    fn test_debug_lists_pairs() {
        let mut h = HeaderStorage::new();
        h.add("foo", "bar");
        h.add("foo", "baz");
        assert_eq!(format!("{h:?}"), r#"[("foo", "bar"), ("foo", "baz")]"#);
    }

    #[test]
    fn test_serializes_as_pairs() {
        let h: HeaderStorage = [("a", "1"), ("A", "2")].into_iter().collect();
        assert_eq!(
            serde_json::to_string(&h).unwrap(),
            r#"[["a","1"],["a","2"]]"#
        );
    }

    #[test]
    fn test_get_list_missing_is_empty() {
        let h = HeaderStorage::new();
        assert!(h.get_list("nope").is_empty());
        assert_eq!(h.get("nope"), None);
    }
}
