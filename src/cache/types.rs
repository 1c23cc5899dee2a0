use serde_json::Value;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Error type for cache backends
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("File '{0}' not found")]
    NotFound(String),

    #[error("Cannot access file '{0}'")]
    Access(String),

    #[error("Memcache server {0} is invalid")]
    InvalidServer(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A stored value together with the moment it was written
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Value,
    pub stored_at: Instant,
}

impl CacheEntry {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            stored_at: Instant::now(),
        }
    }

    /// Whether the entry is still inside a TTL window of `ttl_seconds` (0 never expires)
    pub fn is_fresh(&self, ttl_seconds: u64, now: Instant) -> bool {
        ttl_seconds == 0
            || now.saturating_duration_since(self.stored_at) < Duration::from_secs(ttl_seconds)
    }
}
