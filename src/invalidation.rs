//! Cache invalidation module
//!
//! Removes cached entries after a write has succeeded. Each target is either a
//! plain key (removed with `delete`) or a glob pattern (removed with
//! `delete_pattern`); a string is a pattern when it contains `*` or `?`.
//!
//! [`InvalidateOnSuccess`] wraps a mutating async function: when it returns
//! `Ok` the configured targets are invalidated, when it returns `Err` nothing
//! is touched. The wrapped function's result is always returned unchanged.

use crate::cache_manager::CacheManager;
use crate::codecs::JsonCodec;
use crate::pattern::GlobPattern;
use crate::traits::CacheCodec;
use std::future::Future;
use tracing::{debug, info};

/// A single invalidation target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationTarget {
    /// Remove exactly this key
    Key(String),
    /// Remove every key matching this glob pattern (e.g., "user:*", "product:123:*")
    Pattern(String),
}

impl InvalidationTarget {
    /// Classify `target` by whether it contains wildcards
    pub fn parse(target: impl Into<String>) -> Self {
        let target = target.into();
        if GlobPattern::has_wildcards(&target) {
            Self::Pattern(target)
        } else {
            Self::Key(target)
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Key(s) | Self::Pattern(s) => s,
        }
    }
}

impl From<&str> for InvalidationTarget {
    fn from(target: &str) -> Self {
        Self::parse(target)
    }
}

impl From<String> for InvalidationTarget {
    fn from(target: String) -> Self {
        Self::parse(target)
    }
}

/// Outcome of one invalidation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvalidationStats {
    /// Plain keys processed
    pub keys: usize,
    /// Patterns processed
    pub patterns: usize,
    /// Entries actually removed
    pub removed: u64,
}

impl<C: CacheCodec> CacheManager<C> {
    /// Invalidate each target: plain keys via `delete`, patterns via `delete_pattern`
    ///
    /// Backend failures are logged by the manager and count as nothing removed.
    pub async fn invalidate<I, S>(&self, targets: I) -> InvalidationStats
    where
        I: IntoIterator<Item = S>,
        S: Into<InvalidationTarget>,
    {
        let mut stats = InvalidationStats::default();
        for target in targets {
            match target.into() {
                InvalidationTarget::Key(key) => {
                    stats.keys += 1;
                    if self.delete(&key).await.unwrap_or(false) {
                        stats.removed += 1;
                    }
                }
                InvalidationTarget::Pattern(pattern) => {
                    stats.patterns += 1;
                    stats.removed += self.delete_pattern(&pattern).await.unwrap_or(0);
                }
            }
        }
        debug!(
            keys = stats.keys,
            patterns = stats.patterns,
            removed = stats.removed,
            "[Invalidation] Invalidated cache entries"
        );
        stats
    }

    /// Wrap `func` so `targets` are invalidated after each successful call
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let update_user = cache.invalidate_after(["user:*", "users:list"], move |(id, data)| {
    ///     let db = db.clone();
    ///     async move { db.update_user(id, data).await }
    /// });
    /// update_user.call((42, patch)).await?;
    /// ```
    pub fn invalidate_after<I, S, F>(&self, targets: I, func: F) -> InvalidateOnSuccess<F, C>
    where
        I: IntoIterator<Item = S>,
        S: Into<InvalidationTarget>,
    {
        InvalidateOnSuccess::new(self.clone(), targets, func)
    }
}

/// A mutating async function that invalidates cache entries when it succeeds
pub struct InvalidateOnSuccess<F, C: CacheCodec = JsonCodec> {
    manager: CacheManager<C>,
    targets: Vec<InvalidationTarget>,
    func: F,
}

impl<F, C: CacheCodec> InvalidateOnSuccess<F, C> {
    pub fn new<I, S>(manager: CacheManager<C>, targets: I, func: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<InvalidationTarget>,
    {
        let targets: Vec<InvalidationTarget> = targets.into_iter().map(Into::into).collect();
        info!(targets = targets.len(), "[Invalidation] Registered invalidating wrapper");
        Self {
            manager,
            targets,
            func,
        }
    }

    /// Targets invalidated after each successful call
    #[must_use]
    pub fn targets(&self) -> &[InvalidationTarget] {
        &self.targets
    }

    /// Run the wrapped function; invalidate only if it returned `Ok`
    ///
    /// # Errors
    ///
    /// Returns the wrapped function's error unchanged.
    pub async fn call<A, T, E, Fut>(&self, args: A) -> Result<T, E>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let result = (self.func)(args).await;
        if result.is_ok() {
            let stats = self.manager.invalidate(self.targets.iter().cloned()).await;
            info!(removed = stats.removed, "[Invalidation] Invalidated after successful write");
        } else {
            debug!("[Invalidation] Wrapped call failed, cache left untouched");
        }
        result
    }
}
