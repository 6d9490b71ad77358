//! Ordered key/value store abstraction (C3).
//!
//! The node requires an ordered string KV store with range scan and key
//! iteration; which concrete backend provides it is explicitly out of
//! scope (§1). `InMemoryStore` is the one concrete implementation the node
//! ships, sufficient to satisfy every contract below so the rest of the
//! core can be built and tested against a real instance of the trait
//! rather than a mock.

use std::collections::BTreeMap;
use std::sync::RwLock;

/// An ordered string key/value store with range scan and key iteration.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&self, key: &str, value: &str);
    fn delete(&self, key: &str);
    fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
    /// Keys in lexicographic order.
    fn keys(&self) -> Vec<String>;
    /// Values, in the lexicographic order of their keys.
    fn values(&self) -> Vec<String>;
}

/// An in-process ordered map backing one logical namespace.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<BTreeMap<String, String>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for InMemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.read().expect("store lock poisoned").get(key).cloned()
    }

    fn put(&self, key: &str, value: &str) {
        self.inner
            .write()
            .expect("store lock poisoned")
            .insert(key.to_string(), value.to_string());
    }

    fn delete(&self, key: &str) {
        self.inner.write().expect("store lock poisoned").remove(key);
    }

    fn keys(&self) -> Vec<String> {
        self.inner.read().expect("store lock poisoned").keys().cloned().collect()
    }

    fn values(&self) -> Vec<String> {
        self.inner
            .read()
            .expect("store lock poisoned")
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let store = InMemoryStore::new();
        store.put("a", "1");
        assert_eq!(store.get("a"), Some("1".to_string()));
        assert!(store.has("a"));
        assert!(!store.has("b"));
    }

    #[test]
    fn delete_removes_key() {
        let store = InMemoryStore::new();
        store.put("a", "1");
        store.delete("a");
        assert_eq!(store.get("a"), None);
    }

    #[test]
    fn keys_are_lexicographically_ordered() {
        let store = InMemoryStore::new();
        store.put("b", "2");
        store.put("a", "1");
        store.put("c", "3");
        assert_eq!(store.keys(), vec!["a", "b", "c"]);
        assert_eq!(store.values(), vec!["1", "2", "3"]);
    }

    #[test]
    fn repeated_put_is_idempotent_at_the_key_level() {
        let store = InMemoryStore::new();
        store.put("a", "1");
        store.put("a", "1");
        assert_eq!(store.keys(), vec!["a"]);
    }
}
