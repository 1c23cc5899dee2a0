use anyhow::anyhow;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

use super::call::{CallInfo, HitLookup};
use super::hashing::{self, HashFunction};
use super::signature::Signature;
use super::subject::Subject;
use crate::app::{build_cache, ProxyConfig};
use crate::cache::CacheAdapter;
use crate::utils::ProxyError;

/// Proxy method names a subject may not declare. Compared ignoring case and
/// underscores, so `setSubjectObject` clashes as well.
pub const CONTROL_SURFACE: &[&str] = &[
    "new",
    "from_config",
    "set_subject_object",
    "set_cache_object",
    "set_hash_function",
    "get_hash_function",
    "get_cache_object",
    "make_hash",
    "get_cache_hits",
    "invoke",
];

/// Whether `name` refers to one of the proxy's own methods
pub fn is_control_method(name: &str) -> bool {
    let wanted = normalize(name);
    CONTROL_SURFACE.iter().any(|control| normalize(control) == wanted)
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Subject together with the method registry built when it was assigned
struct BoundSubject {
    type_name: String,
    instance: Box<dyn Subject>,
    methods: HashMap<String, Signature>,
}

/// Memoizing front for a single subject.
///
/// Calls go through [`Proxy::invoke`]; results are stored in the configured
/// cache under a key derived from (subject type, method, arguments) and
/// served from there on repeat calls.
pub struct Proxy {
    subject: Option<BoundSubject>,
    cache: Option<Arc<dyn CacheAdapter>>,
    hash_function: HashFunction,
    hits: HashMap<String, u64>,
}

impl Default for Proxy {
    fn default() -> Self {
        Self::new()
    }
}

impl Proxy {
    /// Create a proxy with no subject, no cache and the default digest
    pub fn new() -> Self {
        Self {
            subject: None,
            cache: None,
            hash_function: HashFunction::default(),
            hits: HashMap::new(),
        }
    }

    /// Build the cache backend and hash function named by `config`
    pub fn from_config(config: &ProxyConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let mut proxy = Self::new();
        proxy.set_hash_function(HashFunction::builtin(&config.hash.function)?)?;
        proxy.set_cache_object(build_cache(&config.cache)?, config.cache.ttl_seconds);
        Ok(proxy)
    }

    /// Assign the subject whose calls get memoized.
    ///
    /// Rejected if any declared method name shadows a proxy method; the
    /// previous subject is kept in that case.
    pub fn set_subject_object<S>(&mut self, subject: S) -> Result<(), ProxyError>
    where
        S: Subject + 'static,
    {
        let declared = subject.methods();
        if let Some(clash) = declared.iter().find(|m| is_control_method(&m.name)) {
            return Err(ProxyError::CollisionError(format!(
                "subject method '{}' shadows a proxy method, which is not allowed",
                clash.name
            )));
        }

        let type_name = std::any::type_name::<S>().to_string();
        debug!("Proxying {} ({} methods)", type_name, declared.len());

        self.subject = Some(BoundSubject {
            type_name,
            instance: Box::new(subject),
            methods: declared
                .into_iter()
                .map(|m| (m.name, m.signature))
                .collect(),
        });
        Ok(())
    }

    /// Use `cache` as the backing store, forwarding `ttl_seconds` to it when given
    pub fn set_cache_object(&mut self, cache: Arc<dyn CacheAdapter>, ttl_seconds: Option<u64>) {
        if let Some(ttl) = ttl_seconds {
            cache.set_cache_time(ttl);
        }
        self.cache = Some(cache);
    }

    /// Install a key-derivation function after validating its declared signature
    pub fn set_hash_function(&mut self, hash_function: HashFunction) -> Result<(), ProxyError> {
        hashing::validate_hash_function(&hash_function)?;
        self.hash_function = hash_function;
        Ok(())
    }

    /// Name of the active hash function
    pub fn get_hash_function(&self) -> &str {
        self.hash_function.name()
    }

    pub fn get_cache_object(&self) -> Option<Arc<dyn CacheAdapter>> {
        self.cache.clone()
    }

    /// Derive the cache key for a call
    pub fn make_hash(&self, call: &CallInfo) -> Result<String, ProxyError> {
        self.hash_function.apply(&call.canonical())
    }

    /// How many times the entry for `lookup` was served from the cache
    pub fn get_cache_hits(&self, lookup: impl Into<HitLookup>) -> Result<u64, ProxyError> {
        let key = match lookup.into() {
            HitLookup::Key(key) => key,
            HitLookup::Call(call) => self.make_hash(&call)?,
        };
        Ok(self.hits.get(&key).copied().unwrap_or(0))
    }

    /// Call `method` on the subject, or return the cached result of an
    /// identical earlier call.
    pub fn invoke(&mut self, method: &str, args: &[Value]) -> Result<Value, ProxyError> {
        let subject = self.subject.as_ref().ok_or_else(missing_subject)?;
        let cache = self
            .cache
            .clone()
            .ok_or_else(|| ProxyError::ConfigurationError("missing cache".to_string()))?;

        let signature = subject.methods.get(method).ok_or_else(|| {
            if is_control_method(method) {
                ProxyError::UnknownMethodError(format!(
                    "{} is a proxy method and is never forwarded",
                    method
                ))
            } else {
                ProxyError::UnknownMethodError(format!(
                    "{}::{}() is not defined",
                    subject.type_name, method
                ))
            }
        })?;
        signature
            .check_args(args)
            .map_err(|reason| ProxyError::CallArityError {
                method: method.to_string(),
                reason,
            })?;

        let call = CallInfo::new(subject.type_name.clone(), method, args.to_vec());
        let key = self.make_hash(&call)?;

        if cache.has(&key)? {
            // The entry can expire between `has` and `get`; treat that as a miss.
            if let Some(value) = cache.get(&key)? {
                let hits = self.hits.entry(key).or_insert(0);
                *hits += 1;
                debug!("Cache hit for {} ({} hits)", method, hits);
                return Ok(value);
            }
        }

        debug!("Cache miss for {}", method);
        let subject = self.subject.as_mut().ok_or_else(missing_subject)?;
        let result = execute_guarded(subject.instance.as_mut(), method, args)?;

        cache.set(&key, &result)?;
        debug!("Stored result of {} under {}", method, key);
        Ok(result)
    }
}

fn missing_subject() -> ProxyError {
    ProxyError::ConfigurationError("missing subject".to_string())
}

/// Run the subject call, turning both returned errors and panics into
/// `SubjectExecutionError`.
fn execute_guarded(
    subject: &mut dyn Subject,
    method: &str,
    args: &[Value],
) -> Result<Value, ProxyError> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| subject.call(method, args)));

    let source = match outcome {
        Ok(Ok(value)) => return Ok(value),
        Ok(Err(err)) => err,
        Err(payload) => anyhow!("panicked: {}", panic_message(payload.as_ref())),
    };

    warn!("Subject call {} failed: {}", method, source);
    Err(ProxyError::SubjectExecutionError {
        method: method.to_string(),
        source,
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
