//! Fallback Cache
//!
//! A caching and rate-limiting layer for web backends featuring:
//! - **Remote tier**: Redis, shared between processes
//! - **Local fallback**: In-process `DashMap` store with TTL expiry, used
//!   automatically while Redis is unreachable
//! - **Pattern Invalidation**: One glob syntax (`*`, `?`) on both tiers
//! - **Cache Stampede Protection**: Single-flight `get_or_set`
//! - **Memoization & Invalidation Wrappers**: Cache async functions by
//!   argument, invalidate after successful writes
//! - **Rate Limiting**: Fixed-window counters on the same storage
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use fallback_cache::CacheSystem;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Reads CACHE_* and REDIS_URL from the environment
//!     let cache = CacheSystem::new().await?;
//!
//!     let data = serde_json::json!({"user": "alice", "score": 100});
//!     cache.cache_manager().set("user:1", &data, Some(Duration::from_secs(60))).await?;
//!
//!     if let Some(cached) = cache.cache_manager().get::<serde_json::Value>("user:1").await? {
//!         tracing::info!("Cached data: {}", cached);
//!     }
//!
//!     let limit = cache
//!         .rate_limiter()
//!         .check_rate_limit("10.0.0.1", 5, Duration::from_secs(300))
//!         .await;
//!     if !limit.allowed {
//!         tracing::warn!(retry_after = ?limit.retry_after, "Too many attempts");
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! CacheManager ─┐                      ┌─► Redis (healthy)
//!               ├─► CompositeBackend ──┤
//! RateLimiter ──┘                      └─► MemoryCache (fallback / mirror)
//! ```

use std::sync::Arc;
use anyhow::Result;
use tracing::{info, warn};

pub mod backends;
pub mod builder;
pub mod cache_manager;
pub mod codecs;
pub mod composite;
pub mod config;
pub mod error;
pub mod invalidation;
pub mod memoize;
pub mod pattern;
pub mod rate_limiter;
pub mod traits;

pub use backends::{MemoryCache, MemoryCacheConfig, MemoryCacheStats, SweeperHandle};

#[cfg(feature = "redis")]
pub use backends::RedisCache;

pub use builder::CacheSystemBuilder;
pub use cache_manager::{CacheManager, CacheManagerStats};
pub use codecs::JsonCodec;
#[cfg(feature = "bincode")]
pub use codecs::BincodeCodec;
#[cfg(feature = "msgpack")]
pub use codecs::MsgPackCodec;
pub use composite::{BackendHealth, CompositeBackend};
pub use config::{BackendKind, CacheConfig};
pub use error::{CacheError, CacheResult};
pub use invalidation::{InvalidateOnSuccess, InvalidationStats, InvalidationTarget};
pub use memoize::{CacheKey, Memoized};
pub use pattern::GlobPattern;
pub use rate_limiter::{RateLimitResult, RateLimiter};
pub use traits::{CacheBackend, CacheCodec};

// Re-export async_trait for user convenience
pub use async_trait::async_trait;

/// Main entry point for the cache system
///
/// Owns the composite backend, the cache manager, the rate limiter and the
/// local expiry sweeper. Clones share everything; the sweeper stops when the
/// last clone is dropped.
///
/// # Example
///
/// ```rust,no_run
/// use fallback_cache::CacheSystem;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let cache = CacheSystem::memory_only().await?;
///
///     // Use cache_manager for all cache operations
///     let manager = cache.cache_manager();
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct CacheSystem {
    /// Unified cache manager (primary interface)
    pub cache_manager: CacheManager,
    /// Fixed-window rate limiter on the same storage
    pub rate_limiter: RateLimiter,
    /// Local tier, for inspection
    pub local_cache: Arc<MemoryCache>,
    backend: Arc<CompositeBackend>,
    sweeper: Arc<SweeperHandle>,
}

impl CacheSystem {
    /// Create new cache system configured from the environment
    ///
    /// See [`CacheConfig::from_env`] for the variables read.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or the Redis URL is
    /// invalid. An unreachable Redis is not an error.
    pub async fn new() -> Result<Self> {
        let config = CacheConfig::from_env()?;
        Self::from_config(config).await
    }

    /// Create cache system from an explicit configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub async fn from_config(config: CacheConfig) -> Result<Self> {
        CacheSystemBuilder::new().with_config(config).build().await
    }

    /// Create cache system with custom Redis URL and otherwise default settings
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be parsed.
    pub async fn with_redis_url(redis_url: &str) -> Result<Self> {
        info!(redis_url = %redis_url, "Initializing Cache System with custom Redis URL");
        Self::from_config(CacheConfig {
            redis_url: redis_url.to_string(),
            ..CacheConfig::default()
        })
        .await
    }

    /// Create cache system without a remote tier
    ///
    /// # Errors
    ///
    /// Only fails on invalid default configuration.
    pub async fn memory_only() -> Result<Self> {
        Self::from_config(CacheConfig::memory_only()).await
    }

    /// Perform health check on both tiers
    ///
    /// Probes the remote immediately (ignoring the cooldown) so a recovered
    /// Redis is picked up. Returns `true` if the local tier is operational;
    /// remote failure is tolerated (graceful degradation).
    pub async fn health_check(&self) -> bool {
        let local_ok = self.backend.health_check().await;
        let remote_ok = if self.backend.has_remote() {
            self.backend.probe_remote().await
        } else {
            true
        };

        if local_ok && remote_ok {
            info!("Cache health check passed");
        } else {
            warn!(local_ok, remote_ok, "Cache health check - partial failure");
        }
        local_ok
    }

    /// Get reference to cache manager (primary interface)
    #[must_use]
    pub fn cache_manager(&self) -> &CacheManager {
        &self.cache_manager
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Composite backend shared by the manager and the rate limiter
    #[must_use]
    pub fn backend(&self) -> &Arc<CompositeBackend> {
        &self.backend
    }

    /// Whether the local expiry sweeper is still running
    #[must_use]
    pub fn sweeper_running(&self) -> bool {
        !self.sweeper.is_finished()
    }
}
