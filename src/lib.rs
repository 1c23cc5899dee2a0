//! Transparent memoizing call proxy.
//!
//! A [`Proxy`] sits in front of a [`Subject`], intercepts calls made through
//! [`Proxy::invoke`] and caches their results in a pluggable [`CacheAdapter`]
//! keyed by a hash of (subject type, method, arguments).

pub mod app;
pub mod cache;
pub mod proxy;
pub mod utils;

pub use app::{load_config, ProxyConfig};
pub use cache::{CacheAdapter, CacheError, MemcacheClient, MemoryCache, SqliteCache};
pub use proxy::{CallInfo, HashFunction, MethodSignature, Proxy, Signature, Subject, ValueKind};
pub use utils::{init_logger, ProxyError};
