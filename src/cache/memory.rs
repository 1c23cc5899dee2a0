use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use super::adapter::CacheAdapter;
use super::types::{CacheEntry, CacheError};

/// In-process cache backend
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    cache_time: AtomicU64,
}

impl MemoryCache {
    /// Create an empty cache whose entries never expire
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of physically stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live(&self, key: &str) -> Option<Value> {
        let ttl = self.get_cache_time();
        let entries = self.entries.lock();
        entries
            .get(key)
            .filter(|entry| entry.is_fresh(ttl, Instant::now()))
            .map(|entry| entry.value.clone())
    }
}

impl CacheAdapter for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        Ok(self.live(key))
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), CacheError> {
        self.entries
            .lock()
            .insert(key.to_string(), CacheEntry::new(value.clone()));
        Ok(())
    }

    fn has(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.live(key).is_some())
    }

    fn set_cache_time(&self, seconds: u64) -> &dyn CacheAdapter {
        self.cache_time.store(seconds, Ordering::Relaxed);
        self
    }

    fn get_cache_time(&self) -> u64 {
        self.cache_time.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_set_then_get() {
        let cache = MemoryCache::new();
        assert!(!cache.has("k").unwrap());
        assert_eq!(cache.get("k").unwrap(), None);

        cache.set("k", &json!({"a": [1, 2]})).unwrap();
        assert!(cache.has("k").unwrap());
        assert_eq!(cache.get("k").unwrap(), Some(json!({"a": [1, 2]})));
    }

    #[test]
    fn test_false_is_a_real_value() {
        let cache = MemoryCache::new();
        cache.set("flag", &json!(false)).unwrap();
        assert!(cache.has("flag").unwrap());
        assert_eq!(cache.get("flag").unwrap(), Some(json!(false)));
    }

    #[test]
    fn test_cache_time_is_fluent() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get_cache_time(), 0);
        assert_eq!(cache.set_cache_time(20).get_cache_time(), 20);
    }

    #[test]
    fn test_expired_entry_is_absent_but_still_stored() {
        let cache = MemoryCache::new();
        cache.set_cache_time(1);
        cache.set("k", &json!("v")).unwrap();
        std::thread::sleep(Duration::from_millis(1100));

        assert!(!cache.has("k").unwrap());
        assert_eq!(cache.get("k").unwrap(), None);
        assert_eq!(cache.len(), 1);
    }
}
