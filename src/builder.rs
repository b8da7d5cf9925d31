//! Cache System Builder
//!
//! Wires configuration, backends, the cache manager, the rate limiter and the
//! local expiry sweeper into a [`CacheSystem`].
//!
//! # Example: Using Default Backends
//!
//! ```rust,no_run
//! use fallback_cache::CacheSystemBuilder;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = CacheSystemBuilder::new()
//!         .build()
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! # Example: Custom Remote Backend
//!
//! ```rust,ignore
//! use fallback_cache::{CacheSystemBuilder, CacheBackend};
//! use std::sync::Arc;
//!
//! let remote = Arc::new(MyMemcachedBackend::new());
//!
//! let cache = CacheSystemBuilder::new()
//!     .with_remote(remote)
//!     .build()
//!     .await?;
//! ```

use crate::backends::{MemoryCache, MemoryCacheConfig};
use crate::cache_manager::CacheManager;
use crate::composite::{BackendHealth, CompositeBackend};
use crate::config::{BackendKind, CacheConfig};
use crate::rate_limiter::RateLimiter;
use crate::traits::CacheBackend;
use crate::CacheSystem;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Builder for constructing [`CacheSystem`]
///
/// # Default Behavior
///
/// Without overrides the builder uses [`CacheConfig::default`]:
/// - **Remote**: Redis at `redis_url` (skipped for [`BackendKind::Memory`])
/// - **Local**: [`MemoryCache`] bounded by `max_local_entries`
pub struct CacheSystemBuilder {
    config: CacheConfig,
    remote: Option<Arc<dyn CacheBackend>>,
    local: Option<Arc<MemoryCache>>,
}

impl CacheSystemBuilder {
    /// Create a new builder with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: CacheConfig::default(),
            remote: None,
            local: None,
        }
    }

    /// Replace the configuration
    #[must_use]
    pub fn with_config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `backend` as the remote tier instead of Redis
    ///
    /// A custom remote is used regardless of [`CacheConfig::backend`].
    #[must_use]
    pub fn with_remote(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.remote = Some(backend);
        self
    }

    /// Use an existing local store (e.g., one shared with other components)
    #[must_use]
    pub fn with_local(mut self, local: Arc<MemoryCache>) -> Self {
        self.local = Some(local);
        self
    }

    /// Build the [`CacheSystem`]
    ///
    /// An unreachable Redis does not fail the build: the system starts on the
    /// local tier and picks Redis up once a recovery probe succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the Redis URL
    /// cannot be parsed.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime (the sweeper is spawned here).
    pub async fn build(self) -> Result<CacheSystem> {
        let config = self.config;
        config.validate().context("invalid cache configuration")?;
        info!(backend = ?config.backend, enabled = config.enabled, "Building Cache System");

        let local = self.local.unwrap_or_else(|| {
            Arc::new(MemoryCache::new(MemoryCacheConfig {
                max_entries: config.max_local_entries,
            }))
        });
        let sweeper = local.spawn_sweeper(config.sweep_interval);

        let health = Arc::new(BackendHealth::new(
            config.health_check_cooldown,
            config.probe_jitter,
        ));

        let remote = match self.remote {
            Some(remote) => {
                info!(backend = remote.name(), "Using custom remote backend");
                Some(remote)
            }
            None => default_remote(&config, &health).await?,
        };

        let backend = Arc::new(
            CompositeBackend::new(remote, local.clone() as Arc<dyn CacheBackend>, health)
                .with_mirror_writes(config.mirror_writes),
        );

        let cache_manager = CacheManager::new(backend.clone() as Arc<dyn CacheBackend>)
            .with_key_prefix(&config.key_prefix)
            .with_default_ttl(config.default_ttl)
            .with_enabled(config.enabled)
            .with_single_flight_timeout(config.single_flight_timeout);
        let rate_limiter = RateLimiter::new(backend.clone() as Arc<dyn CacheBackend>);

        info!(remote_active = backend.remote_active(), "Cache System built successfully");

        Ok(CacheSystem {
            cache_manager,
            rate_limiter,
            local_cache: local,
            backend,
            sweeper: Arc::new(sweeper),
        })
    }
}

impl Default for CacheSystemBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "redis")]
async fn default_remote(
    config: &CacheConfig,
    health: &BackendHealth,
) -> Result<Option<Arc<dyn CacheBackend>>> {
    use crate::backends::RedisCache;

    if config.backend == BackendKind::Memory {
        info!("Memory backend selected, running without a remote tier");
        return Ok(None);
    }

    let redis = RedisCache::with_url(&config.redis_url)?
        .with_operation_timeout(config.operation_timeout)
        .with_namespace(&config.key_prefix);

    if let Err(e) = redis.connect().await {
        // Start degraded so the first requests skip straight to the local tier
        health.mark_degraded();
        warn!(
            error = %e,
            "Redis unreachable at start-up, serving from local backend until it recovers"
        );
    }
    Ok(Some(Arc::new(redis)))
}

#[cfg(not(feature = "redis"))]
async fn default_remote(
    config: &CacheConfig,
    _health: &BackendHealth,
) -> Result<Option<Arc<dyn CacheBackend>>> {
    if config.backend == BackendKind::Redis {
        warn!(
            "Redis backend requested but the `redis` feature is disabled, using local backend only"
        );
    }
    Ok(None)
}
