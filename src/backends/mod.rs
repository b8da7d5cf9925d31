//! Cache Backend Implementations
//!
//! # Available Backends
//!
//! - **Memory** - In-process `DashMap` store with lazy expiry, a background
//!   sweep and bounded size. Always available; the fallback tier.
//! - **Redis** - Distributed cache shared between processes (feature: `redis`,
//!   enabled by default). The primary tier when configured.
//!
//! Both are usually wrapped in a [`CompositeBackend`](crate::composite::CompositeBackend)
//! rather than used directly.
//!
//! # Usage
//!
//! ```rust,no_run
//! use fallback_cache::backends::{MemoryCache, MemoryCacheConfig, RedisCache};
//!
//! # fn example() -> fallback_cache::CacheResult<()> {
//! let local = MemoryCache::new(MemoryCacheConfig { max_entries: 50_000 });
//! let remote = RedisCache::with_url("redis://localhost:6379")?.with_namespace("app:cache:");
//! # Ok(())
//! # }
//! ```

pub mod memory_cache;

#[cfg(feature = "redis")]
pub mod redis_cache;

pub use memory_cache::{MemoryCache, MemoryCacheConfig, MemoryCacheStats, SweeperHandle};

#[cfg(feature = "redis")]
pub use redis_cache::RedisCache;
