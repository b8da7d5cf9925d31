//! Cache Error Taxonomy
//!
//! Every fallible cache operation returns [`CacheError`]. Only two variants
//! ever reach callers of the manager: [`CacheError::Factory`] (their own
//! computation failed) and [`CacheError::Timeout`] (they gave up waiting on
//! someone else's computation). Backend failures are absorbed by the
//! composite backend and the manager.

use std::sync::Arc;
use std::time::Duration;

/// Errors produced by cache backends, the cache manager and the rate limiter
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// The backend cannot reach its storage medium (network, timeout, protocol)
    #[error("{backend} backend unavailable: {reason}")]
    Unavailable {
        /// Name of the backend that failed
        backend: &'static str,
        /// Underlying failure description
        reason: String,
    },

    /// A stored payload could not be encoded or decoded
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// A waiter gave up on an in-flight computation for `key`
    #[error("timed out after {waited:?} waiting for in-flight computation of '{key}'")]
    Timeout {
        /// Key whose computation was being awaited
        key: String,
        /// How long the waiter waited
        waited: Duration,
    },

    /// The factory passed to `get_or_set` failed; shared verbatim with all waiters
    #[error("factory failed: {0}")]
    Factory(Arc<anyhow::Error>),

    /// Invalid configuration value
    #[error("invalid cache configuration: {0}")]
    Config(String),
}

impl CacheError {
    /// Build an `Unavailable` error for `backend`
    pub fn unavailable(backend: &'static str, reason: impl ToString) -> Self {
        Self::Unavailable {
            backend,
            reason: reason.to_string(),
        }
    }

    /// Whether this error means the backend could not be reached
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// The factory error, if this is a [`CacheError::Factory`]
    #[must_use]
    pub fn factory_error(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Factory(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for CacheError {
    fn from(err: anyhow::Error) -> Self {
        Self::Factory(Arc::new(err))
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        Self::unavailable("Redis", err)
    }
}

/// Result alias used across the crate
pub type CacheResult<T> = std::result::Result<T, CacheError>;
