//! Redis Cache - Distributed Cache Backend
//!
//! Thin pass-through to Redis. Every failure (connection, I/O, timeout,
//! protocol) is reported as [`CacheError::Unavailable`] so the composite
//! backend can fall back to the in-process store.

use crate::error::{CacheError, CacheResult};
use crate::pattern::GlobPattern;
use redis::aio::ConnectionManager;
use redis::{Client, RedisResult, Script};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// `INCR` plus `PEXPIRE` on creation in one atomic round trip.
///
/// Returns -1 when the key holds something that is not an integer.
const INCR_WITH_TTL: &str = r"
local count = redis.pcall('INCR', KEYS[1])
if type(count) == 'table' and count.err then
    return -1
end
if count == 1 and tonumber(ARGV[1]) > 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
";

/// Keys fetched per `SCAN` iteration
const SCAN_BATCH: usize = 100;

/// Redis distributed cache with `ConnectionManager` for automatic reconnection
///
/// The connection is established lazily: a Redis that is down when the
/// process starts is picked up later by the composite backend's recovery
/// probe instead of failing start-up.
pub struct RedisCache {
    client: Client,
    /// Redis connection manager - handles reconnection automatically
    connection: OnceCell<ConnectionManager>,
    /// Upper bound for every round trip
    operation_timeout: Duration,
    /// Keys owned by this cache; `clear` only touches these
    namespace: Option<GlobPattern>,
    /// Sentinel read by `health_check`
    probe_key: String,
    incr_script: Script,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
}

impl RedisCache {
    /// Create new Redis cache from the `REDIS_URL` environment variable
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be parsed.
    pub fn new() -> CacheResult<Self> {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        Self::with_url(&redis_url)
    }

    /// Create new Redis cache with custom URL
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection string (e.g., `<redis://localhost:6379>`)
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be parsed. Reachability is not
    /// checked here; see [`connect`](Self::connect).
    pub fn with_url(redis_url: &str) -> CacheResult<Self> {
        info!(redis_url = %redis_url, "Initializing Redis Cache with ConnectionManager");

        let client = Client::open(redis_url).map_err(|e| {
            CacheError::Config(format!("invalid Redis URL '{redis_url}': {e}"))
        })?;

        Ok(Self {
            client,
            connection: OnceCell::new(),
            operation_timeout: Duration::from_secs(1),
            namespace: None,
            probe_key: format!("__cache_health__:{}", uuid::Uuid::new_v4()),
            incr_script: Script::new(INCR_WITH_TTL),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
        })
    }

    /// Bound every Redis round trip by `timeout`
    #[must_use]
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Restrict `clear` to keys starting with `prefix`
    #[must_use]
    pub fn with_namespace(mut self, prefix: &str) -> Self {
        self.namespace = Some(GlobPattern::new("*").with_literal_prefix(prefix));
        self
    }

    /// Establish the connection now instead of on first use
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] if Redis cannot be reached.
    pub async fn connect(&self) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        let _: String = self
            .bounded("PING", redis::cmd("PING").query_async(&mut conn))
            .await?;
        info!("Redis Cache connected successfully (ConnectionManager enabled)");
        Ok(())
    }

    /// Scan keys matching a pattern
    ///
    /// Uses Redis SCAN command (non-blocking, cursor-based iteration)
    /// This is safe for production use, unlike KEYS command.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] if the Redis command fails.
    pub async fn scan_keys(&self, pattern: &GlobPattern) -> CacheResult<Vec<String>> {
        let mut conn = self.connection().await?;
        let redis_pattern = pattern.to_redis_match();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = self
                .bounded(
                    "SCAN",
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&redis_pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn),
                )
                .await?;

            keys.extend(batch);
            cursor = next;

            // Cursor 0 means iteration is complete
            if cursor == 0 {
                break;
            }
        }

        debug!(pattern = %pattern, count = keys.len(), "[Redis] Scanned keys matching pattern");
        Ok(keys)
    }

    /// Remove multiple keys at once (bulk delete)
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] if the Redis command fails.
    pub async fn remove_bulk(&self, keys: &[String]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connection().await?;
        let mut removed = 0u64;
        for chunk in keys.chunks(SCAN_BATCH) {
            let count: u64 = self
                .bounded("DEL", redis::cmd("DEL").arg(chunk).query_async(&mut conn))
                .await?;
            removed += count;
        }
        debug!(count = removed, "[Redis] Removed keys in bulk");
        Ok(removed)
    }

    /// Hit/miss/set counters as `(hits, misses, sets)`
    #[must_use]
    pub fn counters(&self) -> (u64, u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.sets.load(Ordering::Relaxed),
        )
    }

    async fn connection(&self) -> CacheResult<ConnectionManager> {
        let conn = self
            .bounded(
                "connect",
                self.connection
                    .get_or_try_init(|| ConnectionManager::new(self.client.clone())),
            )
            .await?;
        Ok(conn.clone())
    }

    /// Apply the operation timeout and map every failure to `Unavailable`
    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> CacheResult<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(op, error = %e, "[Redis] Command failed");
                Err(CacheError::unavailable("Redis", format!("{op}: {e}")))
            }
            Err(_) => {
                warn!(op, timeout = ?self.operation_timeout, "[Redis] Command timed out");
                Err(CacheError::unavailable(
                    "Redis",
                    format!("{op}: timed out after {:?}", self.operation_timeout),
                ))
            }
        }
    }
}

fn millis(ttl: Duration) -> u64 {
    // PX 0 is rejected by Redis
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

// ===== Trait Implementations =====

use crate::traits::CacheBackend;
use async_trait::async_trait;

/// Implement `CacheBackend` trait for `RedisCache`
#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = self
            .bounded("GET", redis::cmd("GET").arg(key).query_async(&mut conn))
            .await?;

        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(millis(ttl));
        }

        let (): () = self.bounded("SET", cmd.query_async(&mut conn)).await?;
        self.sets.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, ttl = ?ttl, "[Redis] Cached key");
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.connection().await?;
        let removed: u64 = self
            .bounded("DEL", redis::cmd("DEL").arg(key).query_async(&mut conn))
            .await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.connection().await?;
        let count: u64 = self
            .bounded("EXISTS", redis::cmd("EXISTS").arg(key).query_async(&mut conn))
            .await?;
        Ok(count > 0)
    }

    async fn increment(&self, key: &str, ttl_if_new: Option<Duration>) -> CacheResult<u64> {
        let mut conn = self.connection().await?;
        let ttl_ms = ttl_if_new.map_or(0, millis);
        let mut invocation = self.incr_script.key(key);
        invocation.arg(ttl_ms);

        let count: i64 = self
            .bounded("INCR", invocation.invoke_async(&mut conn))
            .await?;
        u64::try_from(count).map_err(|_| {
            CacheError::Serialization(format!("key '{key}' does not hold an integer counter"))
        })
    }

    async fn delete_pattern(&self, pattern: &GlobPattern) -> CacheResult<u64> {
        let keys = self.scan_keys(pattern).await?;
        let removed = self.remove_bulk(&keys).await?;
        debug!(pattern = %pattern, removed, "[Redis] Deleted keys matching pattern");
        Ok(removed)
    }

    async fn ttl_remaining(&self, key: &str) -> CacheResult<Option<Duration>> {
        let mut conn = self.connection().await?;
        // PTTL: -2 = key doesn't exist, -1 = no expiry
        let ttl_ms: i64 = self
            .bounded("PTTL", redis::cmd("PTTL").arg(key).query_async(&mut conn))
            .await?;
        Ok(u64::try_from(ttl_ms).ok().map(Duration::from_millis))
    }

    async fn clear(&self) -> CacheResult<()> {
        let pattern = match &self.namespace {
            Some(namespace) => namespace.clone(),
            None => {
                warn!("[Redis] clear() without a namespace removes every key in the database");
                GlobPattern::new("*")
            }
        };
        self.delete_pattern(&pattern).await.map(|_| ())
    }

    async fn health_check(&self) -> bool {
        match self.get(&self.probe_key).await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "[Redis] Health probe failed");
                false
            }
        }
    }

    fn name(&self) -> &'static str {
        "Redis"
    }
}
