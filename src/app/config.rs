use anyhow::{Context, Result};
use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::cache::{CacheAdapter, MemcacheClient, MemoryCache, SqliteCache};
use crate::proxy::{BUILTIN_HASH_FUNCTIONS, DEFAULT_HASH_FUNCTION};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Cache backend configuration
    #[serde(default)]
    pub cache: CacheSettings,

    /// Key derivation configuration
    #[serde(default)]
    pub hash: HashSettings,
}

/// Which cache backend to build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    Sqlite,
    Memcache,
}

/// Cache backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub backend: CacheBackend,
    /// Entry lifetime forwarded to the backend; unset keeps the backend default
    pub ttl_seconds: Option<u64>,
    /// SQLite database file; unset uses the platform cache directory
    pub sqlite_path: Option<PathBuf>,
    pub memcache_host: String,
    pub memcache_port: u16,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            ttl_seconds: None,
            sqlite_path: None,
            memcache_host: "127.0.0.1".to_string(),
            memcache_port: 11211,
        }
    }
}

/// Key derivation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashSettings {
    /// Built-in digest name (sha224, sha256, sha384, sha512)
    pub function: String,
}

impl Default for HashSettings {
    fn default() -> Self {
        Self {
            function: DEFAULT_HASH_FUNCTION.to_string(),
        }
    }
}

impl ProxyConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.cache.backend == CacheBackend::Memcache && self.cache.memcache_port == 0 {
            anyhow::bail!("memcache_port must be non-zero");
        }

        if !BUILTIN_HASH_FUNCTIONS.contains(&self.hash.function.as_str()) {
            anyhow::bail!(
                "unknown hash function '{}', expected one of {:?}",
                self.hash.function,
                BUILTIN_HASH_FUNCTIONS
            );
        }

        Ok(())
    }
}

/// Layer defaults, the global and local config files, and `MEMOPROXY_` env vars
pub fn load_config() -> Result<ProxyConfig> {
    let global_config = get_config_dir()?.join("config.toml");
    let local_config = PathBuf::from(".memoproxy/config.toml");

    let mut figment = Figment::from(Serialized::defaults(ProxyConfig::default()));

    if global_config.exists() {
        figment = figment.merge(Toml::file(&global_config));
    }

    if local_config.exists() {
        figment = figment.merge(Toml::file(&local_config));
    }

    extract(figment)
}

/// Defaults overlaid with a single TOML file and the environment
pub fn load_config_from(path: &Path) -> Result<ProxyConfig> {
    if !path.exists() {
        anyhow::bail!("Config file {} not found", path.display());
    }

    let figment = Figment::from(Serialized::defaults(ProxyConfig::default())).merge(Toml::file(path));
    extract(figment)
}

fn extract(figment: Figment) -> Result<ProxyConfig> {
    // Nested keys use a double underscore: MEMOPROXY_CACHE__BACKEND=sqlite
    let config: ProxyConfig = figment
        .merge(Env::prefixed("MEMOPROXY_").split("__"))
        .extract()
        .context("Failed to load configuration")?;

    config.validate()?;
    Ok(config)
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    if let Some(proj_dirs) = ProjectDirs::from("", "", "memoproxy") {
        Ok(proj_dirs.config_dir().to_path_buf())
    } else {
        // Fallback to home directory
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .context("Could not determine home directory")?;
        Ok(PathBuf::from(home).join(".config").join("memoproxy"))
    }
}

/// Save configuration to file (the global config file when `path` is None)
pub fn save_config(config: &ProxyConfig, path: Option<PathBuf>) -> Result<()> {
    let path = match path {
        Some(p) => p,
        None => {
            let dir = get_config_dir()?;
            std::fs::create_dir_all(&dir)?;
            dir.join("config.toml")
        }
    };

    let toml_string = toml::to_string_pretty(config)?;
    std::fs::write(&path, toml_string)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;

    Ok(())
}

/// Build the cache backend described by `settings`
pub fn build_cache(settings: &CacheSettings) -> Result<Arc<dyn CacheAdapter>> {
    let cache: Arc<dyn CacheAdapter> = match settings.backend {
        CacheBackend::Memory => Arc::new(MemoryCache::new()),
        CacheBackend::Sqlite => {
            let cache = match &settings.sqlite_path {
                Some(path) => SqliteCache::open(path),
                None => SqliteCache::open_default(),
            }
            .context("Failed to open SQLite cache")?;
            Arc::new(cache)
        }
        CacheBackend::Memcache => Arc::new(
            MemcacheClient::connect(&settings.memcache_host, settings.memcache_port)
                .context("Failed to connect to memcached")?,
        ),
    };

    info!("Using {:?} cache backend", settings.backend);
    Ok(cache)
}
