//! Cache Backend Traits
//!
//! This module defines the trait abstractions shared by every storage tier
//! and by the value codecs.
//!
//! # Architecture
//!
//! - `CacheCodec`: Trait for pluggable serialization backends
//! - `CacheBackend`: Key-value store with TTL, atomic counters and glob deletion
//!
//! # Example: Custom Backend
//!
//! ```rust,ignore
//! use fallback_cache::{async_trait, CacheBackend, CacheResult, GlobPattern};
//! use std::time::Duration;
//!
//! struct MyStore {
//!     // Your implementation
//! }
//!
//! #[async_trait]
//! impl CacheBackend for MyStore {
//!     async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
//!         // Your implementation
//!     }
//!
//!     async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()> {
//!         // Your implementation
//!     }
//!
//!     // ... delete, exists, increment, delete_pattern, ttl_remaining, clear, health_check
//! }
//! ```

use crate::error::CacheResult;
use crate::pattern::GlobPattern;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::time::Duration;

/// Trait for cache value serialization/deserialization
///
/// This trait provides a pluggable serialization abstraction for the cache
/// manager, allowing users to choose between different serialization backends
/// (e.g., `serde_json`, MessagePack) or implement custom serializers.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync + Debug` to support concurrent access
/// across async tasks and provide debugging capabilities. They must also be
/// `Clone` so an in-flight computation can own its own copy.
///
/// # Example: Custom Codec
///
/// ```rust,ignore
/// use fallback_cache::CacheCodec;
/// use anyhow::Result;
/// use serde::{Serialize, de::DeserializeOwned};
///
/// #[derive(Debug, Clone)]
/// struct MyCustomCodec;
///
/// impl CacheCodec for MyCustomCodec {
///     fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
///         Ok(mycodec::serialize(value)?)
///     }
///
///     fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
///         Ok(mycodec::deserialize(bytes)?)
///     }
///
///     fn name(&self) -> &'static str {
///         "mycodec"
///     }
/// }
/// ```
pub trait CacheCodec: Send + Sync + Debug + Clone + 'static {
    /// Serialize a value to bytes
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be represented by this codec.
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>>;

    /// Deserialize bytes to a value
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` is not a valid encoding of `T`.
    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;

    /// Get the name of the codec, used for logging
    fn name(&self) -> &'static str;
}

/// Uniform contract for a key-value store with TTL and pattern operations
///
/// Implemented by the in-process [`MemoryCache`](crate::backends::MemoryCache),
/// the Redis-backed [`RedisCache`](crate::backends::RedisCache), and the
/// [`CompositeBackend`](crate::composite::CompositeBackend) that routes
/// between them.
///
/// # Failure Semantics
///
/// - A missing key is `Ok(None)` / `Ok(false)`, never an error.
/// - [`CacheError::Unavailable`](crate::CacheError::Unavailable) means the
///   storage medium could not be reached. In-process stores never return it.
/// - [`CacheError::Serialization`](crate::CacheError::Serialization) means a
///   stored payload has the wrong shape (e.g. `increment` on a non-counter).
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; `increment` must be atomic under
/// concurrent callers since the rate limiter depends on it.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get the raw payload stored under `key`
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any existing entry
    ///
    /// `ttl = None` stores the entry without expiry.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()>;

    /// Remove `key`; returns whether an entry was removed
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Whether a live entry exists under `key`
    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Atomically add one to the counter at `key` and return the new count
    ///
    /// A missing (or expired) counter is created at 1 with `ttl_if_new`; an
    /// existing counter keeps its TTL.
    async fn increment(&self, key: &str, ttl_if_new: Option<Duration>) -> CacheResult<u64>;

    /// Remove every key matching `pattern`; returns how many were removed
    async fn delete_pattern(&self, pattern: &GlobPattern) -> CacheResult<u64>;

    /// Remaining lifetime of `key`
    ///
    /// `None` when the key is absent or never expires.
    async fn ttl_remaining(&self, key: &str) -> CacheResult<Option<Duration>>;

    /// Remove every entry this backend is responsible for
    async fn clear(&self) -> CacheResult<()>;

    /// Lightweight reachability probe
    async fn health_check(&self) -> bool;

    /// Get the name of this cache backend, used for logging
    fn name(&self) -> &'static str {
        "unknown"
    }
}
