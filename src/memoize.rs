//! Memoization Wrapper
//!
//! Wraps an async function so that calls with equal arguments are served from
//! the cache and concurrent calls share one execution.
//!
//! Keys are `<prefix>:<digest>` where the digest is SHA-256 (hex) over the
//! argument type name and the argument's JSON form. Processes running the same
//! build derive the same keys. The type name comes from
//! [`std::any::type_name`], which may change between compiler versions, so
//! services that share entries across builds should set their own rule with
//! [`Memoized::with_key_fn`]. Argument order matters (`(1, 2)` and `(2, 1)`
//! differ) and so does the argument type.
//!
//! A custom rule also gives readable keys that globs can target:
//!
//! ```rust,ignore
//! let find_user = cache
//!     .memoize("user", None, load_user)
//!     .with_key_fn(|id: &u64| id.to_string()); // user:42
//!
//! cache.invalidate(["user:*"]).await;
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! let find_user = cache.memoize("user", Some(Duration::from_secs(60)), move |id: u64| {
//!     let db = db.clone();
//!     async move { db.find_user(id).await }
//! });
//!
//! let user = find_user.call(42).await?; // computed
//! let user = find_user.call(42).await?; // cached
//! ```

use crate::cache_manager::CacheManager;
use crate::codecs::JsonCodec;
use crate::error::{CacheError, CacheResult};
use crate::traits::CacheCodec;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::fmt::{self, Display};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Cache key helpers
pub struct CacheKey;

impl CacheKey {
    /// Readable key from positional parts and named parts
    ///
    /// Named parts are sorted by name so their order does not matter.
    ///
    /// ```
    /// use fallback_cache::CacheKey;
    ///
    /// let key = CacheKey::generate(&["users"], &[("user_id", 123), ("active", 1)]);
    /// assert_eq!(key, "users:active=1:user_id=123");
    /// ```
    #[must_use]
    pub fn generate<P, V>(parts: &[P], named: &[(&str, V)]) -> String
    where
        P: Display,
        V: Display,
    {
        let mut named: Vec<(&str, String)> =
            named.iter().map(|(k, v)| (*k, v.to_string())).collect();
        named.sort_by(|a, b| a.0.cmp(b.0));

        parts
            .iter()
            .map(ToString::to_string)
            .chain(named.into_iter().map(|(k, v)| format!("{k}={v}")))
            .collect::<Vec<_>>()
            .join(":")
    }

    /// SHA-256 hex digest of any serializable value
    ///
    /// Map keys are sorted before hashing, so two maps with the same entries
    /// hash the same regardless of insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Serialization`] if `value` cannot be represented
    /// as JSON.
    pub fn hashed<T: Serialize + ?Sized>(value: &T) -> CacheResult<String> {
        let mut hasher = Sha256::new();
        hasher.update(canonical_json(value)?);
        Ok(hex::encode(hasher.finalize()))
    }
}

/// JSON bytes with object keys in sorted order
fn canonical_json<T: Serialize + ?Sized>(value: &T) -> CacheResult<Vec<u8>> {
    serde_json::to_value(value)
        .and_then(|v| serde_json::to_vec(&v))
        .map_err(|e| CacheError::Serialization(format!("cannot encode key material: {e}")))
}

type KeyFn<A> = Arc<dyn Fn(&A) -> String + Send + Sync>;

/// An async function whose results are cached by argument
///
/// Created with [`CacheManager::memoize`] or [`Memoized::new`].
pub struct Memoized<F, A, T, C: CacheCodec = JsonCodec> {
    manager: CacheManager<C>,
    prefix: String,
    ttl: Option<Duration>,
    func: Arc<F>,
    key_fn: Option<KeyFn<A>>,
    _marker: PhantomData<fn(A) -> T>,
}

impl<F, A, T, C: CacheCodec> Memoized<F, A, T, C>
where
    A: Serialize,
{
    /// Wrap `func`, caching under `prefix` with `ttl` (`None` → manager default)
    pub fn new(
        manager: CacheManager<C>,
        prefix: impl Into<String>,
        ttl: Option<Duration>,
        func: F,
    ) -> Self {
        Self {
            manager,
            prefix: prefix.into(),
            ttl,
            func: Arc::new(func),
            key_fn: None,
            _marker: PhantomData,
        }
    }

    /// Replace the digest with a custom key rule; keys become `<prefix>:<key_fn(args)>`
    ///
    /// Equal arguments must map to equal keys and different arguments to
    /// different keys, or unrelated calls will share a result.
    #[must_use]
    pub fn with_key_fn<K>(mut self, key_fn: K) -> Self
    where
        K: Fn(&A) -> String + Send + Sync + 'static,
    {
        self.key_fn = Some(Arc::new(key_fn));
        self
    }

    /// Key under which the result for `args` is cached
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Serialization`] if `args` cannot be represented
    /// as JSON.
    pub fn cache_key(&self, args: &A) -> CacheResult<String> {
        if let Some(key_fn) = &self.key_fn {
            return Ok(format!("{}:{}", self.prefix, key_fn(args)));
        }
        let mut hasher = Sha256::new();
        hasher.update(std::any::type_name::<A>().as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical_json(args)?);
        Ok(format!("{}:{}", self.prefix, hex::encode(hasher.finalize())))
    }

    /// Call the wrapped function, or return the cached result for `args`
    ///
    /// # Errors
    ///
    /// Same as [`CacheManager::get_or_set`], plus
    /// [`CacheError::Serialization`] if `args` cannot be encoded.
    pub async fn call<Fut>(&self, args: A) -> CacheResult<T>
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        A: Send + 'static,
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        let key = self.cache_key(&args)?;
        debug!(key = %key, "[Memoize] Call");
        let func = Arc::clone(&self.func);
        self.manager
            .get_or_set(&key, move || (*func)(args), self.ttl)
            .await
    }

    /// Drop the cached result for `args`; returns whether one existed
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Serialization`] if `args` cannot be encoded.
    pub async fn forget(&self, args: &A) -> CacheResult<bool> {
        let key = self.cache_key(args)?;
        self.manager.delete(&key).await
    }

    /// Drop every cached result of this function; returns how many were removed
    pub async fn forget_all(&self) -> u64 {
        self.manager.delete_prefixed(&format!("{}:", self.prefix)).await
    }

    /// Key prefix of this function's entries
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl<F, A, T, C: CacheCodec> fmt::Debug for Memoized<F, A, T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoized")
            .field("prefix", &self.prefix)
            .field("ttl", &self.ttl)
            .field("custom_key", &self.key_fn.is_some())
            .finish_non_exhaustive()
    }
}

impl<C: CacheCodec> CacheManager<C> {
    /// Wrap `func` so its results are cached per argument value
    ///
    /// Multiple arguments are passed as a tuple. See [`Memoized`].
    pub fn memoize<F, A, T, Fut>(
        &self,
        prefix: impl Into<String>,
        ttl: Option<Duration>,
        func: F,
    ) -> Memoized<F, A, T, C>
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        A: Serialize,
    {
        Memoized::new(self.clone(), prefix, ttl, func)
    }
}
