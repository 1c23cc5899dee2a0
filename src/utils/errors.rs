use thiserror::Error;

use crate::cache::CacheError;

/// Main error type for proxied calls
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Collision error: {0}")]
    CollisionError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Unknown method: {0}")]
    UnknownMethodError(String),

    #[error("Bad call to {method}: {reason}")]
    CallArityError { method: String, reason: String },

    #[error("Subject failed while executing {method}: {source}")]
    SubjectExecutionError {
        method: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgumentError(String),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}
