//! Integration tests against a real Redis instance
//!
//! Ignored by default. Run with a Redis at `REDIS_URL`:
//!
//! ```text
//! cargo test --test integration_redis -- --ignored
//! ```
#![cfg(feature = "redis")]

mod common;

use common::*;
use fallback_cache::{CacheBackend, CacheConfig, CacheSystem, GlobPattern, RedisCache};
use std::time::Duration;

fn redis_config(prefix: &str) -> CacheConfig {
    CacheConfig {
        redis_url: redis_url(),
        key_prefix: prefix.to_string(),
        ..CacheConfig::default()
    }
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_set_get_and_pattern_delete() {
    let prefix = format!("{}:", test_key("it"));
    let cache = CacheSystem::from_config(redis_config(&prefix)).await.unwrap();
    assert!(cache.backend().remote_active(), "Redis must be reachable");

    let manager = cache.cache_manager();
    manager.set("user:1", &test_data::User::new(1), None).await.unwrap();
    manager.set("user:2", &test_data::User::new(2), None).await.unwrap();
    manager.set("post:1", &"hello", None).await.unwrap();

    assert_eq!(
        manager.get::<test_data::User>("user:1").await.unwrap(),
        Some(test_data::User::new(1))
    );
    assert_eq!(manager.delete_pattern("user:*").await.unwrap(), 2);
    assert!(manager.exists("post:1").await.unwrap());

    manager.clear().await.unwrap();
    assert!(!manager.exists("post:1").await.unwrap());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_ttl_and_increment() {
    let redis = RedisCache::with_url(&redis_url()).unwrap();
    redis.connect().await.unwrap();
    let key = test_key("counter");

    assert_eq!(redis.increment(&key, Some(Duration::from_secs(10))).await.unwrap(), 1);
    assert_eq!(redis.increment(&key, Some(Duration::from_secs(10))).await.unwrap(), 2);
    let ttl = redis.ttl_remaining(&key).await.unwrap();
    assert!(ttl.is_some_and(|t| t <= Duration::from_secs(10)));

    redis.set(&key, b"not a number", None).await.unwrap();
    assert!(redis.increment(&key, None).await.is_err());
    assert_eq!(redis.ttl_remaining(&key).await.unwrap(), None);
    assert!(redis.delete(&key).await.unwrap());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_literal_metacharacters() {
    let redis = RedisCache::with_url(&redis_url()).unwrap();
    let base = test_key("meta");
    let bracketed = format!("{base}:[a]");
    let plain = format!("{base}:a");
    redis.set(&bracketed, b"1", None).await.unwrap();
    redis.set(&plain, b"1", None).await.unwrap();

    // `[a]` is literal, so only the bracketed key matches
    let removed = redis
        .delete_pattern(&GlobPattern::new(&format!("{base}:[a]*")))
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(redis.exists(&plain).await.unwrap());
    let _ = redis.delete(&plain).await;
}

#[tokio::test]
async fn test_unreachable_redis_starts_on_local() {
    let config = CacheConfig {
        redis_url: "redis://127.0.0.1:1".to_string(),
        operation_timeout: Duration::from_millis(200),
        ..CacheConfig::default()
    };
    let cache = CacheSystem::from_config(config).await.unwrap();
    assert!(!cache.backend().remote_active());

    cache.cache_manager().set("k", &1u8, None).await.unwrap();
    assert_eq!(cache.cache_manager().get::<u8>("k").await.unwrap(), Some(1));
    assert!(cache.health_check().await);
}
