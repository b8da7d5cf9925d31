//! Basic Usage Example
//!
//! Demonstrates cache operations, single-flight `get_or_set`, the wrappers and
//! the rate limiter. Works with or without Redis: when Redis is unreachable
//! everything is served from the in-process fallback.
//!
//! Run with: cargo run --example basic_usage
//! Logs: RUST_LOG=fallback_cache=debug cargo run --example basic_usage

use fallback_cache::CacheSystem;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("=== Fallback Cache: Basic Usage ===\n");

    // 1. Initialize cache system from CACHE_* / REDIS_URL
    let cache = CacheSystem::new().await?;
    println!(
        "Remote tier active: {}\n",
        cache.backend().remote_active()
    );

    // 2. Health check
    if cache.health_check().await {
        println!("✅ Cache system is healthy\n");
    }

    // 3. Store and read a value
    let user_data = serde_json::json!({
        "id": 1,
        "name": "Alice",
        "email": "alice@example.com",
        "role": "admin"
    });

    println!("Storing user data (5 min TTL)...");
    cache
        .cache_manager()
        .set("user:1", &user_data, Some(Duration::from_secs(300)))
        .await?;

    if let Some(cached_user) = cache.cache_manager().get::<serde_json::Value>("user:1").await? {
        println!("✅ Retrieved from cache: {cached_user}\n");
    }

    // 4. Compute once, serve from cache afterwards
    for attempt in 1..=2 {
        let report: Vec<u32> = cache
            .cache_manager()
            .get_or_set(
                "report:daily",
                || async {
                    println!("   computing report...");
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(vec![3, 1, 4, 1, 5])
                },
                Some(Duration::from_secs(60)),
            )
            .await?;
        println!("Attempt {attempt}: report = {report:?}");
    }
    println!();

    // 5. Memoize a lookup and invalidate it after a write
    let find_user = cache.cache_manager().memoize("user_by_id", None, |id: u64| async move {
        Ok(format!("user #{id}"))
    });
    println!("Memoized: {}", find_user.call(7).await?);

    let rename_user = cache
        .cache_manager()
        .invalidate_after(["user_by_id:*", "user:1"], |id: u64| async move {
            anyhow::Ok(id)
        });
    rename_user.call(7).await?;
    println!("Invalidated memoized users after rename\n");

    // 6. Rate limit login attempts
    for _ in 0..4 {
        let result = cache
            .rate_limiter()
            .check_rate_limit("login:10.0.0.1", 3, Duration::from_secs(60))
            .await;
        println!(
            "login attempt: allowed={} remaining={} retry_after={:?}",
            result.allowed, result.remaining, result.retry_after
        );
    }
    println!();

    // 7. Statistics
    let stats = cache.cache_manager().get_stats();
    println!("=== Cache Statistics ===");
    println!("Requests: {}", stats.total_requests);
    println!("Hits: {} / Misses: {}", stats.hits, stats.misses);
    println!("Hit rate: {:.2}%", stats.hit_rate);
    println!("Factory runs: {}", stats.factory_runs);
    println!("Fallbacks to local: {}", cache.backend().fallbacks());

    Ok(())
}
