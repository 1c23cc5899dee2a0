use serde_json::Value;

use super::types::CacheError;

/// Uniform key/value store with a TTL, consumed by the proxy.
///
/// Adapters are shared behind an `Arc`, so every method takes `&self` and
/// implementations keep their mutable state behind a lock.
pub trait CacheAdapter: Send + Sync {
    /// Fetch a value. `None` is the absent marker.
    fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// Store a value; how long it lives is up to the adapter's cache time.
    fn set(&self, key: &str, value: &Value) -> Result<(), CacheError>;

    /// Whether a live entry exists. Expired entries are reported absent
    /// even if they are still physically stored.
    fn has(&self, key: &str) -> Result<bool, CacheError>;

    /// Set the TTL in seconds (0 means entries never expire).
    fn set_cache_time(&self, seconds: u64) -> &dyn CacheAdapter;

    fn get_cache_time(&self) -> u64;
}
