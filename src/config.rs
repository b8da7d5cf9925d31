//! Cache Configuration
//!
//! Plain configuration struct with sensible defaults. [`CacheConfig::from_env`]
//! overlays environment variables on top of the defaults:
//!
//! | Variable | Field | Unit |
//! |---|---|---|
//! | `CACHE_ENABLED` | `enabled` | bool |
//! | `CACHE_TYPE` | `backend` | `redis` / `memory` |
//! | `REDIS_URL` | `redis_url` | URL |
//! | `CACHE_KEY_PREFIX` | `key_prefix` | string |
//! | `CACHE_DEFAULT_TTL` | `default_ttl` | seconds |
//! | `CACHE_HEALTH_COOLDOWN_MS` | `health_check_cooldown` | ms |
//! | `CACHE_SWEEP_INTERVAL_MS` | `sweep_interval` | ms |
//! | `CACHE_MAX_LOCAL_ENTRIES` | `max_local_entries` | count |
//! | `CACHE_MIRROR_WRITES` | `mirror_writes` | bool |
//! | `CACHE_SINGLE_FLIGHT_TIMEOUT_MS` | `single_flight_timeout` | ms |
//! | `CACHE_OPERATION_TIMEOUT_MS` | `operation_timeout` | ms |

use crate::error::CacheError;
use anyhow::{Context, Result};
use std::str::FromStr;
use std::time::Duration;

/// Which store the cache system treats as primary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Redis primary with in-process fallback
    Redis,
    /// In-process store only
    Memory,
}

impl FromStr for BackendKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" | "local" => Ok(Self::Memory),
            other => Err(CacheError::Config(format!(
                "unknown cache backend '{other}' (expected 'redis' or 'memory')"
            ))),
        }
    }
}

/// Configuration for [`CacheSystem`](crate::CacheSystem)
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// When false, reads always miss and writes are skipped
    pub enabled: bool,
    /// Primary store selection
    pub backend: BackendKind,
    /// Redis connection string
    pub redis_url: String,
    /// Namespace prepended to every manager key
    pub key_prefix: String,
    /// TTL used when a caller passes none
    pub default_ttl: Duration,
    /// How long a degraded remote is skipped before a recovery probe
    pub health_check_cooldown: Duration,
    /// Upper bound of random delay added to each cooldown
    pub probe_jitter: Duration,
    /// Period of the local expiry sweep
    pub sweep_interval: Duration,
    /// Entry limit of the local store (soonest-expiring evicted first)
    pub max_local_entries: usize,
    /// Copy successful remote writes into the local store
    pub mirror_writes: bool,
    /// How long a `get_or_set` waiter waits on someone else's computation
    pub single_flight_timeout: Duration,
    /// Bound on a single remote round trip
    pub operation_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: BackendKind::Redis,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "app:cache:".to_string(),
            default_ttl: Duration::from_secs(300),
            health_check_cooldown: Duration::from_secs(5),
            probe_jitter: Duration::from_millis(500),
            sweep_interval: Duration::from_secs(5),
            max_local_entries: 10_000,
            mirror_writes: true,
            single_flight_timeout: Duration::from_secs(30),
            operation_timeout: Duration::from_secs(1),
        }
    }
}

impl CacheConfig {
    /// In-process only configuration, handy for tests and single-node setups
    #[must_use]
    pub fn memory_only() -> Self {
        Self {
            backend: BackendKind::Memory,
            ..Self::default()
        }
    }

    /// Load configuration from process environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed, or if the
    /// resulting configuration fails [`validate`](Self::validate).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("CACHE_ENABLED") {
            config.enabled = parse_bool("CACHE_ENABLED", &v)?;
        }
        if let Some(v) = lookup("CACHE_TYPE") {
            config.backend = v.parse::<BackendKind>().context("CACHE_TYPE")?;
        }
        if let Some(v) = lookup("REDIS_URL") {
            config.redis_url = v;
        }
        if let Some(v) = lookup("CACHE_KEY_PREFIX") {
            config.key_prefix = v;
        }
        if let Some(v) = lookup("CACHE_DEFAULT_TTL") {
            config.default_ttl = Duration::from_secs(parse_num("CACHE_DEFAULT_TTL", &v)?);
        }
        if let Some(v) = lookup("CACHE_HEALTH_COOLDOWN_MS") {
            config.health_check_cooldown =
                Duration::from_millis(parse_num("CACHE_HEALTH_COOLDOWN_MS", &v)?);
        }
        if let Some(v) = lookup("CACHE_SWEEP_INTERVAL_MS") {
            config.sweep_interval =
                Duration::from_millis(parse_num("CACHE_SWEEP_INTERVAL_MS", &v)?);
        }
        if let Some(v) = lookup("CACHE_MAX_LOCAL_ENTRIES") {
            config.max_local_entries = parse_num("CACHE_MAX_LOCAL_ENTRIES", &v)?;
        }
        if let Some(v) = lookup("CACHE_MIRROR_WRITES") {
            config.mirror_writes = parse_bool("CACHE_MIRROR_WRITES", &v)?;
        }
        if let Some(v) = lookup("CACHE_SINGLE_FLIGHT_TIMEOUT_MS") {
            config.single_flight_timeout =
                Duration::from_millis(parse_num("CACHE_SINGLE_FLIGHT_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = lookup("CACHE_OPERATION_TIMEOUT_MS") {
            config.operation_timeout =
                Duration::from_millis(parse_num("CACHE_OPERATION_TIMEOUT_MS", &v)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the cache misbehave
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] naming the offending field.
    pub fn validate(&self) -> Result<(), CacheError> {
        let non_zero = [
            ("default_ttl", self.default_ttl),
            ("health_check_cooldown", self.health_check_cooldown),
            ("sweep_interval", self.sweep_interval),
            ("single_flight_timeout", self.single_flight_timeout),
            ("operation_timeout", self.operation_timeout),
        ];
        if let Some((field, _)) = non_zero.iter().find(|(_, d)| d.is_zero()) {
            return Err(CacheError::Config(format!("{field} must be greater than zero")));
        }
        if self.max_local_entries == 0 {
            return Err(CacheError::Config(
                "max_local_entries must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(CacheError::Config(format!("{name}: '{other}' is not a boolean")).into()),
    }
}

fn parse_num<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse::<T>()
        .with_context(|| format!("{name}: '{value}' is not a valid number"))
}
