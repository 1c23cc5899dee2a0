use serde_json::Value;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use std::fmt;
use std::sync::Arc;

use super::signature::{Signature, ValueKind};
use crate::utils::ProxyError;

/// Digest used when no hash function has been configured
pub const DEFAULT_HASH_FUNCTION: &str = "sha256";

/// Names accepted by [`HashFunction::builtin`]
pub const BUILTIN_HASH_FUNCTIONS: &[&str] = &["sha224", "sha256", "sha384", "sha512"];

type HashBody = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

/// How a hash function was provided. Informational only; validation
/// never looks at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallableKind {
    Function,
    Method,
    StaticMethod,
    Closure,
    Invokable,
}

/// A candidate key-derivation function with its declared signature
#[derive(Clone)]
pub struct HashFunction {
    name: String,
    kind: CallableKind,
    signature: Signature,
    body: HashBody,
}

impl fmt::Debug for HashFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashFunction")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

impl HashFunction {
    /// One of the SHA-2 digests, rendered as lowercase hex
    pub fn builtin(name: &str) -> Result<Self, ProxyError> {
        let digest: fn(&str) -> String = match name {
            "sha224" => hex_digest::<Sha224>,
            "sha256" => hex_digest::<Sha256>,
            "sha384" => hex_digest::<Sha384>,
            "sha512" => hex_digest::<Sha512>,
            other => {
                return Err(ProxyError::InvalidArgumentError(format!(
                    "unknown hash function '{}', expected one of {:?}",
                    other, BUILTIN_HASH_FUNCTIONS
                )))
            }
        };
        let mut function = Self::from_fn(name, digest);
        function.kind = CallableKind::Function;
        Ok(function)
    }

    /// Wrap a typed string-to-string closure; its signature is valid by construction
    pub fn from_fn<F>(name: &str, f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            kind: CallableKind::Closure,
            signature: Signature::new()
                .param("input", ValueKind::String)
                .returns(ValueKind::String),
            body: Arc::new(move |args: &[Value]| match args.first().and_then(Value::as_str) {
                Some(input) => Value::String(f(input)),
                None => Value::Null,
            }),
        }
    }

    /// A dynamically described callable. Nothing is checked here; the
    /// proxy validates the declared signature when it is installed.
    pub fn declared<F>(name: &str, kind: CallableKind, signature: Signature, body: F) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            kind,
            signature,
            body: Arc::new(body),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CallableKind {
        self.kind
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Hash `input`. A body that does not yield a string is an error.
    pub fn apply(&self, input: &str) -> Result<String, ProxyError> {
        match (self.body)(&[Value::String(input.to_string())]) {
            Value::String(hash) => Ok(hash),
            other => Err(ProxyError::InvalidArgumentError(format!(
                "hash function '{}' returned {} instead of a string",
                self.name, other
            ))),
        }
    }
}

impl Default for HashFunction {
    fn default() -> Self {
        let mut function = Self::from_fn(DEFAULT_HASH_FUNCTION, hex_digest::<Sha256>);
        function.kind = CallableKind::Function;
        function
    }
}

/// Accept only callables declaring exactly one required string parameter
/// and a string return type.
pub fn validate_hash_function(candidate: &HashFunction) -> Result<(), ProxyError> {
    let signature = &candidate.signature;
    let reject = |reason: &str| {
        Err(ProxyError::InvalidArgumentError(format!(
            "hash function '{}' {}; it must take a single string and return a string",
            candidate.name, reason
        )))
    };

    match signature.params.as_slice() {
        [] => return reject("declares no parameter"),
        [param] if !param.required => return reject("declares an optional parameter"),
        [param] if param.kind != ValueKind::String => {
            return reject(format!("takes {} instead of string", param.kind).as_str())
        }
        [_] => {}
        _ => return reject("declares more than one parameter"),
    }

    match signature.returns {
        Some(ValueKind::String) => Ok(()),
        Some(other) => reject(format!("returns {} instead of string", other).as_str()),
        None => reject("declares no return type"),
    }
}

fn hex_digest<D: Digest>(input: &str) -> String {
    let mut hasher = D::new();
    hasher.update(input.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect()
}
