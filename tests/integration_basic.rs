//! Basic integration tests for cache operations
//!
//! These run against the memory-only system so they need no Redis.

mod common;

use common::*;
use std::time::Duration;

/// Test basic cache set and get operations
#[tokio::test]
async fn test_basic_set_and_get() {
    let cache = setup_memory_system().await.expect("Failed to setup cache");
    let key = test_key("basic");
    let value = test_data::json_user(1);

    cache
        .cache_manager()
        .set(&key, &value, Some(Duration::from_secs(60)))
        .await
        .expect("Failed to set value");

    let cached: Option<serde_json::Value> = cache
        .cache_manager()
        .get(&key)
        .await
        .expect("Failed to get value");

    assert_eq!(cached, Some(value));
    assert_cache_stats!(cache, hits == 1);
}

/// Test typed values round trip through the codec
#[tokio::test]
async fn test_typed_values() {
    let cache = setup_memory_system().await.unwrap();
    let user = test_data::User::new(7);
    let product = test_data::Product::new(3);

    cache.cache_manager().set("user:7", &user, None).await.unwrap();
    cache.cache_manager().set("product:3", &product, None).await.unwrap();

    assert_eq!(cache.cache_manager().get("user:7").await.unwrap(), Some(user));
    assert_eq!(
        cache.cache_manager().get("product:3").await.unwrap(),
        Some(product)
    );
}

/// Test cache miss behavior
#[tokio::test]
async fn test_cache_miss() {
    let cache = setup_memory_system().await.unwrap();
    let key = test_key("miss");

    let cached: Option<String> = cache.cache_manager().get(&key).await.unwrap();
    assert_eq!(cached, None);

    assert_cache_stats!(cache, misses == 1);
}

/// Entries vanish once their TTL passes, even before the sweeper runs
#[tokio::test]
async fn test_ttl_expiry() {
    let cache = setup_memory_system().await.unwrap();
    let key = test_key("ttl");

    cache
        .cache_manager()
        .set(&key, &"short-lived", Some(Duration::from_millis(100)))
        .await
        .unwrap();
    assert!(cache.cache_manager().exists(&key).await.unwrap());

    tokio::time::sleep(Duration::from_millis(150)).await;

    let cached: Option<String> = cache.cache_manager().get(&key).await.unwrap();
    assert_eq!(cached, None);
    assert!(!cache.cache_manager().exists(&key).await.unwrap());
}

/// Test TTL reporting
#[tokio::test]
async fn test_ttl_remaining() {
    let cache = setup_memory_system().await.unwrap();
    let key = test_key("ttl_remaining");

    cache
        .cache_manager()
        .set(&key, &1u8, Some(Duration::from_secs(30)))
        .await
        .unwrap();

    let ttl = cache.cache_manager().ttl_remaining(&key).await.unwrap();
    assert!(ttl.is_some_and(|t| t > Duration::from_secs(25) && t <= Duration::from_secs(30)));
    assert_eq!(cache.cache_manager().ttl_remaining("absent").await.unwrap(), None);
}

/// Overwriting replaces the value
#[tokio::test]
async fn test_overwrite() {
    let cache = setup_memory_system().await.unwrap();
    cache.cache_manager().set("k", &1u32, None).await.unwrap();
    cache.cache_manager().set("k", &2u32, None).await.unwrap();
    assert_eq!(cache.cache_manager().get::<u32>("k").await.unwrap(), Some(2));
}

/// Delete is idempotent
#[tokio::test]
async fn test_delete() {
    let cache = setup_memory_system().await.unwrap();
    let key = test_key("delete");
    cache.cache_manager().set(&key, &"v", None).await.unwrap();

    assert!(cache.cache_manager().delete(&key).await.unwrap());
    assert!(!cache.cache_manager().delete(&key).await.unwrap());
    assert_eq!(cache.cache_manager().get::<String>(&key).await.unwrap(), None);
}

/// Three keys, pattern matches two: the third survives
#[tokio::test]
async fn test_delete_pattern() {
    let cache = setup_memory_system().await.unwrap();
    let manager = cache.cache_manager();
    manager.set("user:1", &test_data::User::new(1), None).await.unwrap();
    manager.set("user:2", &test_data::User::new(2), None).await.unwrap();
    manager.set("post:1", &"hello", None).await.unwrap();

    assert_eq!(manager.delete_pattern("user:*").await.unwrap(), 2);
    assert!(!manager.exists("user:1").await.unwrap());
    assert!(!manager.exists("user:2").await.unwrap());
    assert!(manager.exists("post:1").await.unwrap());
}

/// `?` matches exactly one character
#[tokio::test]
async fn test_delete_pattern_single_char() {
    let cache = setup_memory_system().await.unwrap();
    let manager = cache.cache_manager();
    for key in ["page:1", "page:2", "page:10"] {
        manager.set(key, &key, None).await.unwrap();
    }
    assert_eq!(manager.delete_pattern("page:?").await.unwrap(), 2);
    assert!(manager.exists("page:10").await.unwrap());
}

/// Clear removes everything under the prefix
#[tokio::test]
async fn test_clear() {
    let cache = setup_memory_system().await.unwrap();
    for i in 0..10 {
        cache.cache_manager().set(&format!("k{i}"), &i, None).await.unwrap();
    }
    cache.cache_manager().clear().await.unwrap();
    assert!(cache.local_cache.is_empty());
}

/// Disabled caching: nothing is stored, factories always run
#[tokio::test]
async fn test_disabled_cache() {
    let config = fallback_cache::CacheConfig {
        enabled: false,
        ..fallback_cache::CacheConfig::memory_only()
    };
    let cache = fallback_cache::CacheSystem::from_config(config).await.unwrap();

    cache.cache_manager().set("k", &1u32, None).await.unwrap();
    assert!(cache.local_cache.is_empty());
    assert_eq!(cache.cache_manager().get::<u32>("k").await.unwrap(), None);

    let value: u32 = cache
        .cache_manager()
        .get_or_set("k", || async { Ok(5) }, None)
        .await
        .unwrap();
    assert_eq!(value, 5);
    assert!(cache.local_cache.is_empty());
}

/// Health check on a memory-only system
#[tokio::test]
async fn test_health_check() {
    let cache = setup_memory_system().await.unwrap();
    assert!(cache.health_check().await);
    assert!(cache.sweeper_running());
}

/// Statistics track sets and hit rate
#[tokio::test]
async fn test_stats() {
    let cache = setup_memory_system().await.unwrap();
    cache.cache_manager().set("a", &1u8, None).await.unwrap();
    let _ = cache.cache_manager().get::<u8>("a").await.unwrap();
    let _ = cache.cache_manager().get::<u8>("b").await.unwrap();

    let stats = cache.cache_manager().get_stats();
    assert_eq!(stats.sets, 1);
    assert_eq!(stats.total_requests, 2);
    assert!((stats.hit_rate - 50.0).abs() < f64::EPSILON);
}
