use chrono::Utc;
use directories::ProjectDirs;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use super::adapter::CacheAdapter;
use super::types::CacheError;

const DEFAULT_SQLITE_FILE: &str = "ProxyCache.sq3";

// Newest row for the key that is still inside the TTL window; ?2 = 0 disables the window.
const FRESH_VALUE_QUERY: &str = "SELECT value FROM cache
     WHERE key = ?1 AND (?2 = 0 OR time > ?3)
     ORDER BY time DESC, rowid DESC
     LIMIT 1";

/// Cache backend stored in a local SQLite database.
///
/// Writes always insert a new row; reads pick the most recent row that is
/// still inside the TTL window.
#[derive(Debug)]
pub struct SqliteCache {
    conn: Mutex<Connection>,
    cache_time: AtomicU64,
}

impl SqliteCache {
    /// Default database location (~/.cache/memoproxy on Linux, temp dir as fallback)
    pub fn default_path() -> PathBuf {
        if let Some(proj_dirs) = ProjectDirs::from("", "", "memoproxy") {
            proj_dirs.cache_dir().join(DEFAULT_SQLITE_FILE)
        } else {
            std::env::temp_dir().join(DEFAULT_SQLITE_FILE)
        }
    }

    /// Open the database at the default location, creating it if needed
    pub fn open_default() -> Result<Self, CacheError> {
        Self::open(Self::default_path())
    }

    /// Open an existing database file.
    ///
    /// Only the default location is created on demand; any other path must
    /// already exist and be readable and writable.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref();

        if !path.exists() {
            if path != Self::default_path() {
                return Err(CacheError::NotFound(path.display().to_string()));
            }
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let conn = Connection::open(path)?;
            prepare_tables(&conn)?;
            debug!("Created cache database at {}", path.display());
            return Ok(Self::with_connection(conn));
        }

        OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|_| CacheError::Access(path.display().to_string()))?;

        let conn = Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS cache (key TEXT, value TEXT, time INTEGER)",
            [],
        )?;
        Ok(Self::with_connection(conn))
    }

    /// Private database that lives as long as this value
    pub fn in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        prepare_tables(&conn)?;
        Ok(Self::with_connection(conn))
    }

    fn with_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            cache_time: AtomicU64::new(0),
        }
    }

    fn insert_at(&self, key: &str, value: &Value, time: i64) -> Result<(), CacheError> {
        let serialized = serde_json::to_string(value)?;
        self.conn.lock().execute(
            "INSERT INTO cache (key, value, time) VALUES (?1, ?2, ?3)",
            params![key, serialized, time],
        )?;
        Ok(())
    }

    fn fresh_row(&self, key: &str) -> Result<Option<String>, CacheError> {
        // Anything past i64::MAX seconds is as good as forever.
        let ttl = i64::try_from(self.get_cache_time()).unwrap_or(i64::MAX);
        let threshold = Utc::now().timestamp().saturating_sub(ttl);

        let conn = self.conn.lock();
        let row = conn
            .query_row(FRESH_VALUE_QUERY, params![key, ttl, threshold], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(row)
    }
}

fn prepare_tables(conn: &Connection) -> Result<(), CacheError> {
    conn.execute_batch(
        "DROP TABLE IF EXISTS cache;
         CREATE TABLE cache (key TEXT, value TEXT, time INTEGER);",
    )?;
    Ok(())
}

impl CacheAdapter for SqliteCache {
    fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        match self.fresh_row(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), CacheError> {
        self.insert_at(key, value, Utc::now().timestamp())
    }

    fn has(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.fresh_row(key)?.is_some())
    }

    fn set_cache_time(&self, seconds: u64) -> &dyn CacheAdapter {
        self.cache_time.store(seconds, Ordering::Relaxed);
        self
    }

    fn get_cache_time(&self) -> u64 {
        self.cache_time.load(Ordering::Relaxed)
    }
}
