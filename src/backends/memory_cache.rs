//! Memory Cache - In-Process Fallback Backend
//!
//! A thread-safe in-memory store built on `DashMap`, used as the fallback
//! tier when Redis is unreachable (and as the only tier in memory mode).
//!
//! Expiry is enforced twice: lazily on every read, and proactively by a
//! periodic sweep ([`MemoryCache::spawn_sweeper`]) that bounds memory growth
//! between accesses. Pattern deletion walks every key, which is O(n) in the
//! number of entries; that is acceptable for a fallback path but it is not
//! meant to carry primary traffic for large key sets.

use crate::error::{CacheError, CacheResult};
use crate::pattern::GlobPattern;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Cache entry with expiration tracking
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

/// Configuration for `MemoryCache`
#[derive(Debug, Clone, Copy)]
pub struct MemoryCacheConfig {
    /// Entry limit; exceeding it evicts soonest-expiring entries first
    pub max_entries: usize,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
        }
    }
}

/// Point-in-time counters for a `MemoryCache`
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
    pub expired_removed: u64,
}

/// In-process cache using `DashMap`
///
/// **Features**:
/// - Sharded locking for concurrent reads/writes
/// - Per-key TTL (or none) with lazy expiry on access
/// - Background expiry sweep
/// - Atomic counters for rate limiting
/// - Bounded size: when `max_entries` is exceeded, entries closest to
///   expiry go first and entries without expiry go last
///
/// **Example**:
/// ```rust
/// use fallback_cache::backends::MemoryCache;
/// use fallback_cache::CacheBackend;
/// use std::time::Duration;
///
/// # async fn example() -> fallback_cache::CacheResult<()> {
/// let cache = MemoryCache::default();
/// cache.set("user:1", b"alice", Some(Duration::from_secs(60))).await?;
/// assert_eq!(cache.get("user:1").await?, Some(b"alice".to_vec()));
/// # Ok(())
/// # }
/// ```
pub struct MemoryCache {
    map: DashMap<String, CacheEntry>,
    max_entries: usize,
    /// Serializes eviction passes; writers that lose the race skip eviction
    eviction_lock: Mutex<()>,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    evictions: AtomicU64,
    expired_removed: AtomicU64,
}

impl MemoryCache {
    /// Create new memory cache
    #[must_use]
    pub fn new(config: MemoryCacheConfig) -> Self {
        info!(max_entries = config.max_entries, "Initializing Memory Cache (DashMap)");

        Self {
            map: DashMap::new(),
            max_entries: config.max_entries.max(1),
            eviction_lock: Mutex::new(()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expired_removed: AtomicU64::new(0),
        }
    }

    /// Remove every expired entry; returns how many were removed
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.map.retain(|_, entry| {
            if entry.is_expired(now) {
                removed += 1;
                false
            } else {
                true
            }
        });
        if removed > 0 {
            self.expired_removed
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!(count = removed, "[Memory] Swept expired entries");
        }
        removed
    }

    /// Start the periodic expiry sweep on the current tokio runtime
    ///
    /// The task holds only a weak reference: it stops when the returned
    /// handle is dropped or when the cache itself is dropped.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use = "dropping the handle stops the sweeper"]
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        let cache: Weak<Self> = Arc::downgrade(self);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(cache) = cache.upgrade() else { break };
                        cache.cleanup_expired();
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
            debug!("[Memory] Expiry sweeper stopped");
        });

        debug!(interval = ?interval, "[Memory] Expiry sweeper started");
        SweeperHandle {
            _shutdown: shutdown_tx,
            task,
        }
    }

    /// Number of stored entries, including expired ones not yet swept
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Check if cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Configured entry limit
    #[must_use]
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Snapshot of the counters
    #[must_use]
    pub fn stats(&self) -> MemoryCacheStats {
        MemoryCacheStats {
            entries: self.map.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expired_removed: self.expired_removed.load(Ordering::Relaxed),
        }
    }

    /// Remove `key` only if it is still expired (a concurrent write may have refreshed it)
    fn remove_if_expired(&self, key: &str) {
        if self
            .map
            .remove_if(key, |_, entry| entry.is_expired(Instant::now()))
            .is_some()
        {
            self.expired_removed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Evict down to capacity; `keep` is the key just written and is never a candidate
    fn enforce_capacity(&self, keep: &str) {
        if self.map.len() <= self.max_entries {
            return;
        }
        let Some(_guard) = self.eviction_lock.try_lock() else {
            return;
        };

        self.cleanup_expired();
        let len = self.map.len();
        if len <= self.max_entries {
            return;
        }

        // Evict down to 90% so a full cache does not pay for a scan on every insert
        let target = self.max_entries - self.max_entries / 10;
        let excess = len.saturating_sub(target);

        let mut candidates: Vec<(Option<Instant>, String)> = self
            .map
            .iter()
            .filter(|entry| entry.key() != keep)
            .map(|entry| (entry.expires_at, entry.key().clone()))
            .collect();
        candidates.sort_unstable_by_key(|(expires_at, _)| (expires_at.is_none(), *expires_at));

        let mut evicted = 0u64;
        for (_, key) in candidates.into_iter().take(excess) {
            if self.map.remove(&key).is_some() {
                evicted += 1;
            }
        }
        self.evictions.fetch_add(evicted, Ordering::Relaxed);
        debug!(
            evicted,
            max_entries = self.max_entries,
            "[Memory] Evicted soonest-expiring entries"
        );
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(MemoryCacheConfig::default())
    }
}

/// Handle to the background expiry sweep; dropping it stops the task
#[derive(Debug)]
pub struct SweeperHandle {
    _shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Whether the sweep task has exited
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

fn parse_counter(bytes: &[u8]) -> CacheResult<u64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| CacheError::Serialization("value is not an integer counter".to_string()))
}

// ===== Trait Implementations =====

use crate::traits::CacheBackend;
use async_trait::async_trait;

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let expired = match self.map.get(key) {
            Some(entry) if !entry.is_expired(Instant::now()) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(entry.value.clone()));
            }
            Some(_) => true,
            None => false,
        };
        // Read guard is released above; removing while holding it would deadlock the shard
        if expired {
            self.remove_if_expired(key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()> {
        self.map
            .insert(key.to_string(), CacheEntry::new(value.to_vec(), ttl));
        self.sets.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, ttl = ?ttl, "[Memory] Cached key");
        self.enforce_capacity(key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        Ok(self.map.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let expired = match self.map.get(key) {
            Some(entry) => entry.is_expired(Instant::now()),
            None => return Ok(false),
        };
        if expired {
            self.remove_if_expired(key);
        }
        Ok(!expired)
    }

    async fn increment(&self, key: &str, ttl_if_new: Option<Duration>) -> CacheResult<u64> {
        let now = Instant::now();
        // The entry guard holds the shard write lock, so read-modify-write is atomic
        let (count, created) = match self.map.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(CacheEntry::new(b"1".to_vec(), ttl_if_new));
                    (1, false)
                } else {
                    let next = parse_counter(&occupied.get().value)?
                        .checked_add(1)
                        .ok_or_else(|| CacheError::Serialization("counter overflow".to_string()))?;
                    occupied.get_mut().value = next.to_string().into_bytes();
                    (next, false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry::new(b"1".to_vec(), ttl_if_new));
                (1, true)
            }
        };
        if created {
            self.enforce_capacity(key);
        }
        Ok(count)
    }

    async fn delete_pattern(&self, pattern: &GlobPattern) -> CacheResult<u64> {
        let matching: Vec<String> = self
            .map
            .iter()
            .filter(|entry| pattern.is_match(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0u64;
        for key in matching {
            if self.map.remove(&key).is_some() {
                removed += 1;
            }
        }
        debug!(pattern = %pattern, removed, "[Memory] Deleted keys matching pattern");
        Ok(removed)
    }

    async fn ttl_remaining(&self, key: &str) -> CacheResult<Option<Duration>> {
        let now = Instant::now();
        let (expired, remaining) = match self.map.get(key) {
            Some(entry) if entry.is_expired(now) => (true, None),
            Some(entry) => (
                false,
                entry
                    .expires_at
                    .map(|expires_at| expires_at.saturating_duration_since(now)),
            ),
            None => (false, None),
        };
        if expired {
            self.remove_if_expired(key);
        }
        Ok(remaining)
    }

    async fn clear(&self) -> CacheResult<()> {
        self.map.clear();
        Ok(())
    }

    async fn health_check(&self) -> bool {
        // In-process storage cannot be unreachable
        true
    }

    fn name(&self) -> &'static str {
        "Memory"
    }
}
