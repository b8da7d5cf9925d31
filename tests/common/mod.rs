//! Common utilities for integration tests
//!
//! This module provides shared test infrastructure including:
//! - Cache system setup (memory-only, or with a controllable remote)
//! - A remote backend that can be switched off to simulate outages
//! - Test data generators
#![allow(dead_code)]

use anyhow::Result;
use fallback_cache::{
    CacheBackend, CacheConfig, CacheError, CacheResult, CacheSystem, CacheSystemBuilder,
    GlobPattern, MemoryCache, async_trait,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Get Redis URL from environment or use default
pub fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// Create a test key with unique suffix
pub fn test_key(name: &str) -> String {
    format!("test_{}_{}", name, rand::random::<u32>())
}

/// Initialize a cache system without a remote tier
pub async fn setup_memory_system() -> Result<CacheSystem> {
    CacheSystem::memory_only().await
}

/// Initialize a cache system whose remote is `remote`
///
/// A short cooldown keeps recovery tests fast.
pub async fn setup_system_with_remote(
    remote: Arc<FlakyBackend>,
    cooldown: Duration,
) -> Result<CacheSystem> {
    let config = CacheConfig {
        health_check_cooldown: cooldown,
        probe_jitter: Duration::ZERO,
        ..CacheConfig::memory_only()
    };
    CacheSystemBuilder::new()
        .with_config(config)
        .with_remote(remote)
        .build()
        .await
}

/// In-memory "remote" that can be taken down and brought back
pub struct FlakyBackend {
    inner: MemoryCache,
    down: AtomicBool,
    calls: AtomicU64,
}

impl FlakyBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryCache::default(),
            down: AtomicBool::new(false),
            calls: AtomicU64::new(0),
        })
    }

    /// Simulate a network partition (`true`) or recovery (`false`)
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Number of operations attempted against this backend
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Direct access to the stored data, bypassing the outage switch
    pub fn store(&self) -> &MemoryCache {
        &self.inner
    }

    fn reachable(&self) -> CacheResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            Err(CacheError::unavailable("Flaky", "connection refused"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheBackend for FlakyBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.reachable()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()> {
        self.reachable()?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.reachable()?;
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.reachable()?;
        self.inner.exists(key).await
    }

    async fn increment(&self, key: &str, ttl_if_new: Option<Duration>) -> CacheResult<u64> {
        self.reachable()?;
        self.inner.increment(key, ttl_if_new).await
    }

    async fn delete_pattern(&self, pattern: &GlobPattern) -> CacheResult<u64> {
        self.reachable()?;
        self.inner.delete_pattern(pattern).await
    }

    async fn ttl_remaining(&self, key: &str) -> CacheResult<Option<Duration>> {
        self.reachable()?;
        self.inner.ttl_remaining(key).await
    }

    async fn clear(&self) -> CacheResult<()> {
        self.reachable()?;
        self.inner.clear().await
    }

    async fn health_check(&self) -> bool {
        self.reachable().is_ok()
    }

    fn name(&self) -> &'static str {
        "Flaky"
    }
}

/// Generate test data of various types
pub mod test_data {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct User {
        pub id: u64,
        pub name: String,
        pub email: String,
    }

    impl User {
        pub fn new(id: u64) -> Self {
            Self {
                id,
                name: format!("User {id}"),
                email: format!("user{id}@example.com"),
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct Product {
        pub id: u64,
        pub name: String,
        pub price: f64,
        pub category: String,
    }

    impl Product {
        pub fn new(id: u64) -> Self {
            Self {
                id,
                name: format!("Product {id}"),
                price: 99.99 + (id as f64),
                category: format!("Category {}", id % 5),
            }
        }
    }

    /// Generate JSON test data
    pub fn json_user(id: u64) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "name": format!("User {id}"),
            "email": format!("user{id}@example.com"),
            "created_at": "2025-01-01T00:00:00Z"
        })
    }
}

/// Assert that cache stats meet expectations
#[macro_export]
macro_rules! assert_cache_stats {
    ($cache:expr, $field:ident > $value:expr) => {
        let stats = $cache.cache_manager().get_stats();
        assert!(
            stats.$field > $value,
            "Expected {} > {}, got {}",
            stringify!($field),
            $value,
            stats.$field
        );
    };
    ($cache:expr, $field:ident == $value:expr) => {
        let stats = $cache.cache_manager().get_stats();
        assert_eq!(
            stats.$field,
            $value,
            "Expected {} == {}, got {}",
            stringify!($field),
            $value,
            stats.$field
        );
    };
}
