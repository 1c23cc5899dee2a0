// Gateway module for cache backends
mod adapter;
mod memcache;
mod memory;
mod sqlite;
mod types;

pub use adapter::CacheAdapter;
pub use memcache::MemcacheClient;
pub use memory::MemoryCache;
pub use sqlite::SqliteCache;
pub use types::{CacheEntry, CacheError};
