//! Fixed-Window Rate Limiter
//!
//! Counts requests per caller key in a counter stored at
//! `rate_limit:<key>`. The first request of a window creates the counter with
//! the window as TTL; when the TTL lapses the next request starts a fresh
//! window. Counting relies on the backend's atomic `increment`, so concurrent
//! requests never lose updates.
//!
//! Fixed windows allow up to twice the limit across a window boundary. The
//! limiter fails open: if the backend errors, the request is allowed.

use crate::error::CacheResult;
use crate::traits::CacheBackend;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default storage prefix for rate-limit counters
pub const DEFAULT_PREFIX: &str = "rate_limit:";

/// Outcome of a rate-limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests left in the current window
    pub remaining: u32,
    /// Time until the window resets; set only when denied
    pub retry_after: Option<Duration>,
}

impl RateLimitResult {
    fn allow(remaining: u32) -> Self {
        Self {
            allowed: true,
            remaining,
            retry_after: None,
        }
    }

    fn deny(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            retry_after: Some(retry_after),
        }
    }
}

/// Fixed-window request counter on top of a [`CacheBackend`]
#[derive(Clone)]
pub struct RateLimiter {
    backend: Arc<dyn CacheBackend>,
    key_prefix: String,
}

impl RateLimiter {
    #[must_use]
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            key_prefix: DEFAULT_PREFIX.to_string(),
        }
    }

    /// Store counters under `prefix` instead of `rate_limit:`
    #[must_use]
    pub fn with_key_prefix(mut self, prefix: &str) -> Self {
        self.key_prefix = prefix.to_string();
        self
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }

    /// Count one request for `key` and decide whether it is allowed
    ///
    /// The `n`-th request of a window is allowed while `n <= max_attempts`
    /// and reports `remaining = max_attempts - n`.
    pub async fn check_rate_limit(
        &self,
        key: &str,
        max_attempts: u32,
        window: Duration,
    ) -> RateLimitResult {
        let storage_key = self.storage_key(key);
        let count = match self.backend.increment(&storage_key, Some(window)).await {
            Ok(count) => count,
            Err(e) => {
                warn!(key = %key, error = %e, "[RateLimit] Backend error, allowing request");
                return RateLimitResult::allow(max_attempts);
            }
        };

        if count <= u64::from(max_attempts) {
            let remaining = u32::try_from(u64::from(max_attempts) - count).unwrap_or(0);
            debug!(key = %key, count, remaining, "[RateLimit] Allowed");
            return RateLimitResult::allow(remaining);
        }

        let retry_after = self.retry_after(&storage_key, window).await;
        debug!(key = %key, count, retry_after = ?retry_after, "[RateLimit] Denied");
        RateLimitResult::deny(retry_after)
    }

    /// Current state of `key` without counting a request
    ///
    /// `allowed` tells whether the next request would be allowed.
    pub async fn status(&self, key: &str, max_attempts: u32, window: Duration) -> RateLimitResult {
        let storage_key = self.storage_key(key);
        let count = match self.current_count(&storage_key).await {
            Ok(count) => count,
            Err(e) => {
                warn!(key = %key, error = %e, "[RateLimit] Backend error reading status");
                return RateLimitResult::allow(max_attempts);
            }
        };

        if count < u64::from(max_attempts) {
            RateLimitResult::allow(u32::try_from(u64::from(max_attempts) - count).unwrap_or(0))
        } else {
            RateLimitResult::deny(self.retry_after(&storage_key, window).await)
        }
    }

    /// Start a fresh window for `key`; returns whether a window existed
    pub async fn reset(&self, key: &str) -> bool {
        match self.backend.delete(&self.storage_key(key)).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(key = %key, error = %e, "[RateLimit] Failed to reset window");
                false
            }
        }
    }

    async fn current_count(&self, storage_key: &str) -> CacheResult<u64> {
        let Some(raw) = self.backend.get(storage_key).await? else {
            return Ok(0);
        };
        Ok(std::str::from_utf8(&raw)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(0))
    }

    /// Remaining window lifetime; the full window when it cannot be read
    async fn retry_after(&self, storage_key: &str, window: Duration) -> Duration {
        match self.backend.ttl_remaining(storage_key).await {
            Ok(Some(ttl)) => ttl,
            Ok(None) => window,
            Err(e) => {
                debug!(key = %storage_key, error = %e, "[RateLimit] TTL lookup failed");
                window
            }
        }
    }
}
