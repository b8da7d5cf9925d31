//! Cache Manager - Unified Cache Operations
//!
//! Public facade over a [`CacheBackend`] (normally the
//! [`CompositeBackend`](crate::composite::CompositeBackend)): namespaced keys,
//! typed values through a [`CacheCodec`], absorbed backend failures and
//! single-flight `get_or_set`.
//!
//! # Single-Flight
//!
//! ```text
//! get_or_set(k) ─ hit ─────────────────────────────► value
//!       │ miss
//!       ├─ in-flight entry for k? ── yes ──► await shared computation (timeout)
//!       │                                              │
//!       └─ no ──► become leader: re-check, factory, store ──► value to everyone
//! ```
//!
//! The computation is a shared future referenced weakly from the in-flight
//! map. It keeps running while anyone awaits it, so a cancelled leader does not
//! strand its followers, and it removes its own map entry when it finishes or
//! when every waiter has gone away.

use crate::codecs::JsonCodec;
use crate::error::{CacheError, CacheResult};
use crate::pattern::GlobPattern;
use crate::traits::{CacheBackend, CacheCodec};
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::future::{BoxFuture, Shared, WeakShared};
use futures_util::FutureExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

type SharedComputation = Shared<BoxFuture<'static, CacheResult<Bytes>>>;

/// In-flight computation marker
struct InFlight {
    /// Distinguishes this computation from a later one for the same key
    id: u64,
    future: WeakShared<BoxFuture<'static, CacheResult<Bytes>>>,
}

type InFlightMap = DashMap<String, InFlight>;

/// RAII cleanup guard for in-flight request tracking
///
/// Owned by the shared computation, so the entry is removed when the
/// computation completes, panics, or is dropped by its last waiter.
struct CleanupGuard {
    map: Arc<InFlightMap>,
    key: String,
    id: u64,
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        self.map.remove_if(&self.key, |_, entry| entry.id == self.id);
    }
}

#[derive(Debug, Default)]
struct ManagerCounters {
    total_requests: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    coalesced: AtomicU64,
    factory_runs: AtomicU64,
    factory_errors: AtomicU64,
    timeouts: AtomicU64,
    decode_errors: AtomicU64,
    next_flight_id: AtomicU64,
}

/// Cache Manager statistics
#[derive(Debug, Clone, Default)]
pub struct CacheManagerStats {
    pub total_requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    /// `get_or_set` calls that joined someone else's computation
    pub coalesced: u64,
    pub factory_runs: u64,
    pub factory_errors: u64,
    /// Waiters that gave up on an in-flight computation
    pub timeouts: u64,
    /// Stored payloads that could not be decoded (served as misses)
    pub decode_errors: u64,
    pub in_flight_requests: usize,
    /// Hits as a percentage of reads
    pub hit_rate: f64,
}

/// Cache Manager - typed, namespaced operations over one backend
///
/// Cheap to clone; clones share the backend, statistics and in-flight map.
#[derive(Clone)]
pub struct CacheManager<C: CacheCodec = JsonCodec> {
    backend: Arc<dyn CacheBackend>,
    codec: C,
    key_prefix: Arc<str>,
    default_ttl: Duration,
    enabled: bool,
    single_flight_timeout: Duration,
    in_flight: Arc<InFlightMap>,
    counters: Arc<ManagerCounters>,
}

impl CacheManager<JsonCodec> {
    /// Create new cache manager with JSON values and default settings
    #[must_use]
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self::with_codec(backend, JsonCodec)
    }
}

impl<C: CacheCodec> CacheManager<C> {
    /// Create new cache manager with a custom codec
    #[must_use]
    pub fn with_codec(backend: Arc<dyn CacheBackend>, codec: C) -> Self {
        info!(backend = backend.name(), codec = codec.name(), "Initializing Cache Manager");
        Self {
            backend,
            codec,
            key_prefix: Arc::from("app:cache:"),
            default_ttl: Duration::from_secs(300),
            enabled: true,
            single_flight_timeout: Duration::from_secs(30),
            in_flight: Arc::new(DashMap::new()),
            counters: Arc::new(ManagerCounters::default()),
        }
    }

    /// Namespace prepended to every key and pattern
    #[must_use]
    pub fn with_key_prefix(mut self, prefix: &str) -> Self {
        self.key_prefix = Arc::from(prefix);
        self
    }

    /// TTL used when a caller passes `None`
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Disable caching: reads miss, writes are skipped, factories always run
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// How long `get_or_set` waits on another caller's computation
    #[must_use]
    pub fn with_single_flight_timeout(mut self, timeout: Duration) -> Self {
        self.single_flight_timeout = timeout;
        self
    }

    /// Backend this manager writes to
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    #[must_use]
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }

    /// Get value from cache
    ///
    /// Backend failures and undecodable payloads are logged and reported as a
    /// miss.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the `Result` keeps the signature uniform.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        if !self.enabled {
            return Ok(None);
        }
        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);

        let value = self.read(&self.full_key(key)).await;
        if value.is_some() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "[Cache] Hit");
        } else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "[Cache] Miss");
        }
        Ok(value)
    }

    /// Set value with `ttl` (`None` → default TTL)
    ///
    /// Backend failures are logged and swallowed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Serialization`] if `value` cannot be encoded.
    pub async fn set<T: Serialize + Sync + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        if !self.enabled {
            return Ok(());
        }
        let bytes = self
            .codec
            .serialize(value)
            .map_err(|e| CacheError::Serialization(format!("{key}: {e:#}")))?;
        let ttl = ttl.unwrap_or(self.default_ttl);
        write_through(&*self.backend, &self.counters, &self.full_key(key), &bytes, ttl).await;
        Ok(())
    }

    /// Delete key from cache; returns whether something was removed
    ///
    /// # Errors
    ///
    /// Never fails in practice; backend failures read as "nothing removed".
    pub async fn delete(&self, key: &str) -> CacheResult<bool> {
        match self.backend.delete(&self.full_key(key)).await {
            Ok(removed) => Ok(removed),
            Err(e) => {
                warn!(key = %key, error = %e, "[Cache] Delete failed");
                Ok(false)
            }
        }
    }

    /// Whether a live entry exists for `key`
    ///
    /// # Errors
    ///
    /// Never fails in practice; backend failures read as absent.
    pub async fn exists(&self, key: &str) -> CacheResult<bool> {
        if !self.enabled {
            return Ok(false);
        }
        match self.backend.exists(&self.full_key(key)).await {
            Ok(found) => Ok(found),
            Err(e) => {
                warn!(key = %key, error = %e, "[Cache] Exists check failed");
                Ok(false)
            }
        }
    }

    /// Remaining lifetime of `key`
    ///
    /// # Errors
    ///
    /// Never fails in practice; backend failures read as unknown.
    pub async fn ttl_remaining(&self, key: &str) -> CacheResult<Option<Duration>> {
        match self.backend.ttl_remaining(&self.full_key(key)).await {
            Ok(ttl) => Ok(ttl),
            Err(e) => {
                warn!(key = %key, error = %e, "[Cache] TTL lookup failed");
                Ok(None)
            }
        }
    }

    /// Remove every key matching the glob `pattern` (relative to the prefix)
    ///
    /// # Errors
    ///
    /// Never fails in practice; backend failures read as zero removed.
    pub async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        let glob = GlobPattern::new(pattern).with_literal_prefix(&self.key_prefix);
        Ok(self.delete_glob(&glob, pattern).await)
    }

    /// Remove every key that starts with the literal `prefix` (no wildcards)
    pub(crate) async fn delete_prefixed(&self, prefix: &str) -> u64 {
        let literal = format!("{}{prefix}", self.key_prefix);
        let glob = GlobPattern::new("*").with_literal_prefix(&literal);
        self.delete_glob(&glob, prefix).await
    }

    async fn delete_glob(&self, glob: &GlobPattern, pattern: &str) -> u64 {
        match self.backend.delete_pattern(glob).await {
            Ok(removed) => {
                debug!(pattern = %pattern, removed, "[Cache] Deleted keys matching pattern");
                removed
            }
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "[Cache] Pattern delete failed");
                0
            }
        }
    }

    /// Remove every entry under this manager's prefix
    ///
    /// # Errors
    ///
    /// Never fails in practice; backend failures are logged.
    pub async fn clear(&self) -> CacheResult<()> {
        let removed = self.delete_pattern("*").await?;
        info!(removed, prefix = %self.key_prefix, "[Cache] Cleared");
        Ok(())
    }

    /// Get value from cache, or compute it once and cache it
    ///
    /// Concurrent callers missing the same key share one execution of
    /// `factory`. Errors are returned to every waiter and never cached.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let user: User = cache
    ///     .get_or_set("user:42", || async move { db.load_user(42).await }, None)
    ///     .await?;
    /// ```
    ///
    /// # Errors
    ///
    /// - [`CacheError::Factory`] if the computation failed
    /// - [`CacheError::Timeout`] if this caller waited longer than the
    ///   single-flight timeout for another caller's computation
    /// - [`CacheError::Serialization`] if the computed value cannot be encoded
    pub async fn get_or_set<T, F, Fut>(
        &self,
        key: &str,
        factory: F,
        ttl: Option<Duration>,
    ) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        if !self.enabled {
            self.counters.factory_runs.fetch_add(1, Ordering::Relaxed);
            return factory().await.map_err(CacheError::from);
        }

        if let Some(value) = self.get::<T>(key).await? {
            return Ok(value);
        }

        let full_key = self.full_key(key);
        let (computation, unused_factory) = self.join_or_start(&full_key, factory, ttl);

        let bytes = if unused_factory.is_none() {
            computation.await?
        } else {
            self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "[Cache] Waiting on in-flight computation");
            let waited = tokio::time::timeout(self.single_flight_timeout, computation).await;
            if let Ok(result) = waited {
                result?
            } else {
                self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(
                    key = %key,
                    waited = ?self.single_flight_timeout,
                    "[Cache] Gave up waiting on in-flight computation"
                );
                return Err(CacheError::Timeout {
                    key: key.to_string(),
                    waited: self.single_flight_timeout,
                });
            }
        };

        match self.codec.deserialize::<T>(&bytes) {
            Ok(value) => Ok(value),
            Err(e) => {
                self.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
                let Some(factory) = unused_factory else {
                    return Err(CacheError::Serialization(format!(
                        "{key}: stored result is not a {}: {e:#}",
                        std::any::type_name::<T>()
                    )));
                };
                // A concurrent caller used the same key for a different type
                warn!(
                    key = %key,
                    error = %e,
                    "[Cache] Shared result does not decode, computing locally"
                );
                self.counters.factory_runs.fetch_add(1, Ordering::Relaxed);
                factory().await.map_err(CacheError::from)
            }
        }
    }

    /// Snapshot of the manager's counters
    #[must_use]
    pub fn get_stats(&self) -> CacheManagerStats {
        let c = &self.counters;
        let hits = c.hits.load(Ordering::Relaxed);
        let misses = c.misses.load(Ordering::Relaxed);
        let reads = hits + misses;
        #[allow(clippy::cast_precision_loss)]
        let hit_rate = if reads > 0 {
            (hits as f64 / reads as f64) * 100.0
        } else {
            0.0
        };

        CacheManagerStats {
            total_requests: c.total_requests.load(Ordering::Relaxed),
            hits,
            misses,
            sets: c.sets.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            factory_runs: c.factory_runs.load(Ordering::Relaxed),
            factory_errors: c.factory_errors.load(Ordering::Relaxed),
            timeouts: c.timeouts.load(Ordering::Relaxed),
            decode_errors: c.decode_errors.load(Ordering::Relaxed),
            in_flight_requests: self
                .in_flight
                .iter()
                .filter(|entry| entry.future.upgrade().is_some())
                .count(),
            hit_rate,
        }
    }

    /// Raw read: backend failures and decode failures become `None`
    async fn read<T: DeserializeOwned>(&self, full_key: &str) -> Option<T> {
        let bytes = match self.backend.get(full_key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %full_key, error = %e, "[Cache] Read failed, treating as miss");
                return None;
            }
        };
        match self.codec.deserialize(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                self.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    key = %full_key,
                    error = %e,
                    "[Cache] Stored value does not decode, treating as miss"
                );
                None
            }
        }
    }

    /// Join the live computation for `full_key` or register a new one
    ///
    /// A joining caller gets its unused factory back.
    fn join_or_start<T, F, Fut>(
        &self,
        full_key: &str,
        factory: F,
        ttl: Option<Duration>,
    ) -> (SharedComputation, Option<F>)
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        match self.in_flight.entry(full_key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if let Some(live) = occupied.get().future.upgrade() {
                    return (live, Some(factory));
                }
                let (id, computation) = self.computation(full_key, factory, ttl);
                if let Some(future) = computation.downgrade() {
                    occupied.insert(InFlight { id, future });
                }
                (computation, None)
            }
            Entry::Vacant(vacant) => {
                let (id, computation) = self.computation(full_key, factory, ttl);
                if let Some(future) = computation.downgrade() {
                    vacant.insert(InFlight { id, future });
                }
                (computation, None)
            }
        }
    }

    /// Build the shared leader computation: re-check, run factory, store
    fn computation<T, F, Fut>(
        &self,
        full_key: &str,
        factory: F,
        ttl: Option<Duration>,
    ) -> (u64, SharedComputation)
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let id = self.counters.next_flight_id.fetch_add(1, Ordering::Relaxed);
        let guard = CleanupGuard {
            map: Arc::clone(&self.in_flight),
            key: full_key.to_string(),
            id,
        };
        let backend = Arc::clone(&self.backend);
        let counters = Arc::clone(&self.counters);
        let codec = self.codec.clone();
        let key = full_key.to_string();
        let ttl = ttl.unwrap_or(self.default_ttl);

        let computation = async move {
            let _guard = guard;

            // Another process (or a caller that just finished) may have filled it
            if let Ok(Some(bytes)) = backend.get(&key).await {
                if codec.deserialize::<T>(&bytes).is_ok() {
                    debug!(key = %key, "[Cache] Filled while acquiring computation");
                    return Ok(Bytes::from(bytes));
                }
            }

            counters.factory_runs.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "[Cache] Computing fresh value (single-flight)");
            let value = match AssertUnwindSafe(factory()).catch_unwind().await {
                Ok(Ok(value)) => value,
                Ok(Err(e)) => {
                    counters.factory_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(key = %key, error = %e, "[Cache] Factory failed, nothing cached");
                    return Err(CacheError::from(e));
                }
                Err(_) => {
                    counters.factory_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(key = %key, "[Cache] Factory panicked, nothing cached");
                    return Err(CacheError::from(anyhow::anyhow!(
                        "factory for '{key}' panicked"
                    )));
                }
            };

            let bytes = codec.serialize(&value).map_err(|e| {
                CacheError::Serialization(format!(
                    "{key}: cannot encode {}: {e:#}",
                    std::any::type_name::<T>()
                ))
            })?;
            write_through(&*backend, &counters, &key, &bytes, ttl).await;
            Ok(Bytes::from(bytes))
        }
        .boxed()
        .shared();

        (id, computation)
    }
}

/// Store `bytes`, logging and swallowing backend failures
async fn write_through(
    backend: &dyn CacheBackend,
    counters: &ManagerCounters,
    full_key: &str,
    bytes: &[u8],
    ttl: Duration,
) {
    match backend.set(full_key, bytes, Some(ttl)).await {
        Ok(()) => {
            counters.sets.fetch_add(1, Ordering::Relaxed);
            debug!(key = %full_key, ttl = ?ttl, "[Cache] Stored");
        }
        Err(e) => warn!(
            key = %full_key,
            error = %e,
            "[Cache] Write failed, continuing without cache"
        ),
    }
}
