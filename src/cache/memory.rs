//! In-process cache provider
//!
//! Default provider when Mirix runs without Redis: a dashmap with per-entry
//! TTL, lazily evicted on read. Host applications with a shared cache tier
//! register their own provider instead.

use dashmap::DashMap;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::CacheProvider;

#[derive(Clone)]
enum CachedValue {
    Json(serde_json::Value),
    Hash(HashMap<String, String>),
}

struct Entry {
    value: CachedValue,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Thread-safe in-memory cache with optional per-entry TTL
#[derive(Default)]
pub struct MemoryCacheProvider {
    entries: DashMap<String, Entry>,
}

impl MemoryCacheProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.value().is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn store(&self, key: &str, value: CachedValue, ttl: Option<Duration>) -> bool {
        let expires_at = ttl.map(|d| Instant::now() + d);
        self.entries.insert(key.to_string(), Entry { value, expires_at });
        true
    }

    fn load(&self, key: &str) -> Option<CachedValue> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.is_expired() => true,
            Some(entry) => return Some(entry.value.clone()),
            None => return None,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }
}

impl CacheProvider for MemoryCacheProvider {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.get_json(key)
    }

    fn set(&self, key: &str, data: &serde_json::Value, ttl: Option<Duration>) -> bool {
        self.set_json(key, data, ttl)
    }

    fn delete(&self, key: &str) -> bool {
        self.entries.remove(key);
        true
    }

    fn get_hash(&self, key: &str) -> Option<HashMap<String, String>> {
        match self.load(key) {
            Some(CachedValue::Hash(map)) => Some(map),
            _ => None,
        }
    }

    fn set_hash(&self, key: &str, data: &HashMap<String, String>, ttl: Option<Duration>) -> bool {
        self.store(key, CachedValue::Hash(data.clone()), ttl)
    }

    fn get_json(&self, key: &str) -> Option<serde_json::Value> {
        match self.load(key) {
            Some(CachedValue::Json(value)) => Some(value),
            _ => None,
        }
    }

    fn set_json(&self, key: &str, data: &serde_json::Value, ttl: Option<Duration>) -> bool {
        self.store(key, CachedValue::Json(data.clone()), ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_set_get_delete() {
        let cache = MemoryCacheProvider::new();
        let value = json!({"id": "raw_mem-1", "context": "hello"});

        assert!(cache.set_json("raw_memory:raw_mem-1", &value, None));
        assert_eq!(cache.get_json("raw_memory:raw_mem-1"), Some(value));

        assert!(cache.delete("raw_memory:raw_mem-1"));
        assert_eq!(cache.get_json("raw_memory:raw_mem-1"), None);
        // Deleting an absent key still succeeds
        assert!(cache.delete("raw_memory:raw_mem-1"));
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = MemoryCacheProvider::new();
        let value = json!({"x": 1});
        cache.set_json("k", &value, Some(Duration::from_millis(10)));
        assert!(cache.get_json("k").is_some());

        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(cache.get_json("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_hash_and_json_are_distinct_shapes() {
        let cache = MemoryCacheProvider::new();
        let mut hash = HashMap::new();
        hash.insert("field".to_string(), "value".to_string());

        cache.set_hash("h", &hash, None);
        assert_eq!(cache.get_hash("h"), Some(hash));
        // A hash entry does not answer JSON reads
        assert_eq!(cache.get_json("h"), None);
    }
}
