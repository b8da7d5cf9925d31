//! Composite Backend - Remote First, Local Fallback
//!
//! Routes every operation to the remote backend while it is healthy. When the
//! remote reports [`CacheError::Unavailable`] the composite marks it degraded,
//! serves the call from the local backend, and stops contacting the remote
//! until a cooldown has passed. After the cooldown exactly one caller runs a
//! recovery probe; success re-promotes the remote, failure re-arms the
//! cooldown.
//!
//! ```text
//!             healthy                     degraded
//! request ──► Remote ──Unavailable──►  Local (cooldown) ──probe ok──► Remote
//!               │                          │
//!               └── mirror writes ──► Local └── probe failed: re-arm cooldown
//! ```
//!
//! Remote and local copies are independent: nothing is synchronised when the
//! remote comes back, so values written during an outage are only visible
//! while the fallback is active.

use crate::error::{CacheError, CacheResult};
use crate::pattern::GlobPattern;
use crate::traits::CacheBackend;
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Sentinel for "no probe scheduled" while the remote is healthy
const NO_PROBE: u64 = u64::MAX;

/// Reachability state of the remote backend
///
/// Starts optimistic (healthy). Transitions use compare-and-set so that many
/// concurrent failure reports produce a single degradation, and only one
/// caller at a time may run a recovery probe.
#[derive(Debug)]
pub struct BackendHealth {
    healthy: AtomicBool,
    probing: AtomicBool,
    /// Milliseconds since `epoch` after which a probe is allowed
    next_probe_at: AtomicU64,
    epoch: Instant,
    cooldown: Duration,
    jitter: Duration,
    degradations: AtomicU64,
    recoveries: AtomicU64,
}

impl BackendHealth {
    /// Create a healthy state with the given probe cooldown and random jitter bound
    #[must_use]
    pub fn new(cooldown: Duration, jitter: Duration) -> Self {
        Self {
            healthy: AtomicBool::new(true),
            probing: AtomicBool::new(false),
            next_probe_at: AtomicU64::new(NO_PROBE),
            epoch: Instant::now(),
            cooldown,
            jitter,
            degradations: AtomicU64::new(0),
            recoveries: AtomicU64::new(0),
        }
    }

    /// Whether the remote is currently considered reachable
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Flip healthy → degraded; returns true only for the caller that flipped it
    pub fn mark_degraded(&self) -> bool {
        if self
            .healthy
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.arm_cooldown();
            self.degradations.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Flip degraded → healthy; returns true only for the caller that flipped it
    pub fn mark_healthy(&self) -> bool {
        // Disarm first so nobody probes a remote that is already back
        self.next_probe_at.store(NO_PROBE, Ordering::Release);
        if self
            .healthy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.recoveries.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Number of healthy → degraded transitions so far
    #[must_use]
    pub fn degradations(&self) -> u64 {
        self.degradations.load(Ordering::Relaxed)
    }

    /// Number of degraded → healthy transitions so far
    #[must_use]
    pub fn recoveries(&self) -> u64 {
        self.recoveries.load(Ordering::Relaxed)
    }

    /// Claim the single probe slot if the remote is degraded and the cooldown passed
    fn try_begin_probe(&self) -> Option<ProbeGuard<'_>> {
        if self.is_healthy() || self.now_ms() < self.next_probe_at.load(Ordering::Acquire) {
            return None;
        }
        self.probing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ProbeGuard { health: self })
    }

    fn arm_cooldown(&self) {
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        let cooldown_ms = u64::try_from(self.cooldown.as_millis()).unwrap_or(u64::MAX);
        let deadline = self
            .now_ms()
            .saturating_add(cooldown_ms)
            .saturating_add(jitter);
        self.next_probe_at.store(deadline, Ordering::Release);
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

impl Default for BackendHealth {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_millis(500))
    }
}

/// Releases the probe slot on drop, including when the probing task is cancelled
struct ProbeGuard<'a> {
    health: &'a BackendHealth,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.health.probing.store(false, Ordering::Release);
    }
}

/// Remote + local backend pair with health-based routing
pub struct CompositeBackend {
    remote: Option<Arc<dyn CacheBackend>>,
    local: Arc<dyn CacheBackend>,
    health: Arc<BackendHealth>,
    mirror_writes: bool,
    fallbacks: AtomicU64,
}

impl CompositeBackend {
    /// Pair `remote` with `local`; `remote = None` serves everything locally
    #[must_use]
    pub fn new(
        remote: Option<Arc<dyn CacheBackend>>,
        local: Arc<dyn CacheBackend>,
        health: Arc<BackendHealth>,
    ) -> Self {
        info!(
            remote = remote.as_ref().map_or("none", |r| r.name()),
            local = local.name(),
            "Initializing Composite Backend"
        );
        Self {
            remote,
            local,
            health,
            mirror_writes: true,
            fallbacks: AtomicU64::new(0),
        }
    }

    /// Local store only
    #[must_use]
    pub fn local_only(local: Arc<dyn CacheBackend>) -> Self {
        Self::new(None, local, Arc::new(BackendHealth::default()))
    }

    /// Copy successful remote writes to the local store (default: on)
    #[must_use]
    pub fn with_mirror_writes(mut self, mirror_writes: bool) -> Self {
        self.mirror_writes = mirror_writes;
        self
    }

    /// Shared health state of the remote
    #[must_use]
    pub fn health(&self) -> &Arc<BackendHealth> {
        &self.health
    }

    #[must_use]
    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Whether a remote is configured and currently considered healthy
    #[must_use]
    pub fn remote_active(&self) -> bool {
        self.remote.is_some() && self.health.is_healthy()
    }

    /// Number of operations served by the local store because the remote failed
    #[must_use]
    pub fn fallbacks(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }

    /// Probe the remote immediately, ignoring the cooldown
    ///
    /// Returns whether the remote is healthy afterwards (false without a remote).
    pub async fn probe_remote(&self) -> bool {
        let Some(remote) = &self.remote else {
            return false;
        };
        if remote.health_check().await {
            if self.health.mark_healthy() {
                info!(backend = remote.name(), "Remote backend recovered");
            }
            true
        } else {
            if self.health.mark_degraded() {
                warn!(backend = remote.name(), "Remote backend failed health probe");
            }
            false
        }
    }

    /// The remote to use for this call, running a recovery probe when one is due
    async fn active_remote(&self) -> Option<&Arc<dyn CacheBackend>> {
        let remote = self.remote.as_ref()?;
        if self.health.is_healthy() {
            return Some(remote);
        }

        let _probe = self.health.try_begin_probe()?;
        if remote.health_check().await {
            if self.health.mark_healthy() {
                info!(backend = remote.name(), "Remote backend recovered, routing back to remote");
            }
            Some(remote)
        } else {
            self.health.arm_cooldown();
            debug!(backend = remote.name(), "Recovery probe failed, staying on local backend");
            None
        }
    }

    fn record_unavailable(&self, op: &'static str, err: &CacheError) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
        if self.health.mark_degraded() {
            warn!(op, error = %err, "Remote backend unavailable, falling back to local backend");
        } else {
            debug!(op, error = %err, "Remote backend failed, using local backend");
        }
    }
}

#[async_trait]
impl CacheBackend for CompositeBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        if let Some(remote) = self.active_remote().await {
            match remote.get(key).await {
                Err(e) if e.is_unavailable() => self.record_unavailable("get", &e),
                result => return result,
            }
        }
        self.local.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()> {
        if let Some(remote) = self.active_remote().await {
            match remote.set(key, value, ttl).await {
                Ok(()) => {
                    if self.mirror_writes {
                        if let Err(e) = self.local.set(key, value, ttl).await {
                            warn!(
                                key = %key,
                                error = %e,
                                "Failed to mirror write to local backend"
                            );
                        }
                    }
                    return Ok(());
                }
                Err(e) if e.is_unavailable() => self.record_unavailable("set", &e),
                Err(e) => return Err(e),
            }
        }
        self.local.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut removed = false;
        if let Some(remote) = self.active_remote().await {
            match remote.delete(key).await {
                Ok(r) => removed = r,
                Err(e) if e.is_unavailable() => self.record_unavailable("delete", &e),
                Err(e) => return Err(e),
            }
        }
        // Always purge the fallback copy so it cannot resurface during an outage
        let local_removed = self.local.delete(key).await?;
        Ok(removed || local_removed)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        if let Some(remote) = self.active_remote().await {
            match remote.exists(key).await {
                Err(e) if e.is_unavailable() => self.record_unavailable("exists", &e),
                result => return result,
            }
        }
        self.local.exists(key).await
    }

    async fn increment(&self, key: &str, ttl_if_new: Option<Duration>) -> CacheResult<u64> {
        if let Some(remote) = self.active_remote().await {
            match remote.increment(key, ttl_if_new).await {
                Err(e) if e.is_unavailable() => self.record_unavailable("increment", &e),
                result => return result,
            }
        }
        self.local.increment(key, ttl_if_new).await
    }

    async fn delete_pattern(&self, pattern: &GlobPattern) -> CacheResult<u64> {
        let mut remote_removed = None;
        if let Some(remote) = self.active_remote().await {
            match remote.delete_pattern(pattern).await {
                Ok(count) => remote_removed = Some(count),
                Err(e) if e.is_unavailable() => self.record_unavailable("delete_pattern", &e),
                Err(e) => return Err(e),
            }
        }
        let local_removed = self.local.delete_pattern(pattern).await?;
        // Mirrored copies would be counted twice; the serving tier's count is authoritative
        Ok(remote_removed.unwrap_or(local_removed))
    }

    async fn ttl_remaining(&self, key: &str) -> CacheResult<Option<Duration>> {
        if let Some(remote) = self.active_remote().await {
            match remote.ttl_remaining(key).await {
                Err(e) if e.is_unavailable() => self.record_unavailable("ttl_remaining", &e),
                result => return result,
            }
        }
        self.local.ttl_remaining(key).await
    }

    async fn clear(&self) -> CacheResult<()> {
        if let Some(remote) = self.active_remote().await {
            if let Err(e) = remote.clear().await {
                if e.is_unavailable() {
                    self.record_unavailable("clear", &e);
                } else {
                    return Err(e);
                }
            }
        }
        self.local.clear().await
    }

    async fn health_check(&self) -> bool {
        // Serviceable as long as the fallback works
        self.local.health_check().await
    }

    fn name(&self) -> &'static str {
        "Composite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryCache;

    /// Memory store that can be switched off to simulate a network partition
    struct FlakyRemote {
        inner: MemoryCache,
        down: AtomicBool,
        calls: AtomicU64,
    }

    impl FlakyRemote {
        fn new() -> Self {
            Self {
                inner: MemoryCache::default(),
                down: AtomicBool::new(false),
                calls: AtomicU64::new(0),
            }
        }

        fn check(&self) -> CacheResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                Err(CacheError::unavailable("Flaky", "connection refused"))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl CacheBackend for FlakyRemote {
        async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
            self.check()?;
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()> {
            self.check()?;
            self.inner.set(key, value, ttl).await
        }
        async fn delete(&self, key: &str) -> CacheResult<bool> {
            self.check()?;
            self.inner.delete(key).await
        }
        async fn exists(&self, key: &str) -> CacheResult<bool> {
            self.check()?;
            self.inner.exists(key).await
        }
        async fn increment(&self, key: &str, ttl: Option<Duration>) -> CacheResult<u64> {
            self.check()?;
            self.inner.increment(key, ttl).await
        }
        async fn delete_pattern(&self, pattern: &GlobPattern) -> CacheResult<u64> {
            self.check()?;
            self.inner.delete_pattern(pattern).await
        }
        async fn ttl_remaining(&self, key: &str) -> CacheResult<Option<Duration>> {
            self.check()?;
            self.inner.ttl_remaining(key).await
        }
        async fn clear(&self) -> CacheResult<()> {
            self.check()?;
            self.inner.clear().await
        }
        async fn health_check(&self) -> bool {
            self.check().is_ok()
        }
    }

    fn composite(cooldown: Duration) -> (CompositeBackend, Arc<FlakyRemote>, Arc<MemoryCache>) {
        let remote = Arc::new(FlakyRemote::new());
        let local = Arc::new(MemoryCache::default());
        let backend = CompositeBackend::new(
            Some(remote.clone() as Arc<dyn CacheBackend>),
            local.clone() as Arc<dyn CacheBackend>,
            Arc::new(BackendHealth::new(cooldown, Duration::ZERO)),
        );
        (backend, remote, local)
    }

    #[test]
    fn test_health_transitions_happen_once() {
        let health = BackendHealth::new(Duration::from_secs(60), Duration::ZERO);
        assert!(health.is_healthy());
        assert!(health.mark_degraded());
        assert!(!health.mark_degraded());
        assert!(health.try_begin_probe().is_none(), "cooldown not elapsed");
        assert!(health.mark_healthy());
        assert!(!health.mark_healthy());
        assert_eq!(health.degradations(), 1);
        assert_eq!(health.recoveries(), 1);
    }

    #[test]
    fn test_single_probe_slot() {
        let health = BackendHealth::new(Duration::ZERO, Duration::ZERO);
        health.mark_degraded();
        let first = health.try_begin_probe();
        assert!(first.is_some());
        assert!(health.try_begin_probe().is_none());
        drop(first);
        assert!(health.try_begin_probe().is_some());
    }

    #[tokio::test]
    async fn test_healthy_remote_serves_and_mirrors() {
        let (backend, remote, local) = composite(Duration::from_secs(60));
        backend
            .set("k", b"v", None)
            .await
            .unwrap_or_else(|e| panic!("set failed: {e}"));

        assert_eq!(remote.inner.get("k").await.ok().flatten(), Some(b"v".to_vec()));
        assert_eq!(local.get("k").await.ok().flatten(), Some(b"v".to_vec()));
        assert_eq!(backend.get("k").await.ok().flatten(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_mirror_writes_can_be_disabled() {
        let (backend, _remote, local) = composite(Duration::from_secs(60));
        let backend = backend.with_mirror_writes(false);
        let _ = backend.set("k", b"v", None).await;
        assert!(local.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_remote_falls_back_and_is_skipped() {
        let (backend, remote, local) = composite(Duration::from_secs(60));
        remote.down.store(true, Ordering::SeqCst);

        backend
            .set("k", b"v", None)
            .await
            .unwrap_or_else(|e| panic!("write must not fail: {e}"));
        assert!(!backend.remote_active());
        assert_eq!(local.get("k").await.ok().flatten(), Some(b"v".to_vec()));

        let calls = remote.calls.load(Ordering::SeqCst);
        assert_eq!(backend.get("k").await.ok().flatten(), Some(b"v".to_vec()));
        assert_eq!(
            remote.calls.load(Ordering::SeqCst),
            calls,
            "degraded remote is not contacted before the cooldown"
        );
        assert_eq!(backend.fallbacks(), 1);
    }

    #[tokio::test]
    async fn test_recovery_after_cooldown_probe() {
        let (backend, remote, _local) = composite(Duration::from_millis(30));
        remote.down.store(true, Ordering::SeqCst);
        let _ = backend.get("k").await;
        assert!(!backend.remote_active());

        // Still down after the cooldown: probe fails and re-arms
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = backend.get("k").await;
        assert!(!backend.remote_active());

        remote.down.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = remote.inner.set("k", b"remote", None).await;
        assert_eq!(backend.get("k").await.ok().flatten(), Some(b"remote".to_vec()));
        assert!(backend.remote_active());
        assert_eq!(backend.health().recoveries(), 1);
    }

    #[tokio::test]
    async fn test_increment_falls_back_to_local() {
        let (backend, remote, _local) = composite(Duration::from_secs(60));
        assert_eq!(backend.increment("c", None).await.ok(), Some(1));
        remote.down.store(true, Ordering::SeqCst);
        assert_eq!(
            backend.increment("c", None).await.ok(),
            Some(1),
            "local counter is independent"
        );
        assert_eq!(backend.increment("c", None).await.ok(), Some(2));
    }

    #[tokio::test]
    async fn test_delete_pattern_counts_serving_tier_and_purges_local() {
        let (backend, _remote, local) = composite(Duration::from_secs(60));
        for key in ["user:1", "user:2", "post:1"] {
            let _ = backend.set(key, b"v", None).await;
        }
        let removed = backend
            .delete_pattern(&GlobPattern::new("user:*"))
            .await
            .unwrap_or_default();
        assert_eq!(removed, 2);
        assert_eq!(local.len(), 1);
        assert!(backend.exists("post:1").await.unwrap_or(false));
    }

    #[tokio::test]
    async fn test_probe_remote_ignores_cooldown() {
        let (backend, remote, _local) = composite(Duration::from_secs(3600));
        remote.down.store(true, Ordering::SeqCst);
        assert!(!backend.probe_remote().await);
        remote.down.store(false, Ordering::SeqCst);
        assert!(backend.probe_remote().await);
        assert!(backend.remote_active());
    }

    #[tokio::test]
    async fn test_local_only() {
        let backend = CompositeBackend::local_only(Arc::new(MemoryCache::default()));
        let _ = backend.set("k", b"v", Some(Duration::from_secs(5))).await;
        assert_eq!(backend.get("k").await.ok().flatten(), Some(b"v".to_vec()));
        assert!(!backend.remote_active());
        assert!(!backend.probe_remote().await);
    }
}
