//! Benchmarks for basic cache operations
//!
//! This benchmark suite measures the performance of:
//! - Cache writes for different data sizes
//! - Cache hit vs miss latency
//! - `get_or_set` on a warm key
//! - Rate limiter checks
//! - Local pattern deletion
//!
//! All benchmarks run on the memory-only system so no Redis is needed.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use fallback_cache::CacheSystem;
use serde_json::json;
use std::time::Duration;
use tokio::runtime::Runtime;

/// Setup cache system for benchmarks
fn setup_cache() -> (CacheSystem, Runtime) {
    let rt = Runtime::new().unwrap_or_else(|_| panic!("Failed to create runtime"));
    let cache = rt.block_on(async {
        CacheSystem::memory_only()
            .await
            .unwrap_or_else(|_| panic!("Failed to create cache system"))
    });
    (cache, rt)
}

/// Generate test data of specified size
fn test_data(size_bytes: usize) -> serde_json::Value {
    let data_string = "x".repeat(size_bytes);
    json!({
        "data": data_string,
        "size": size_bytes,
        "timestamp": "2025-01-01T00:00:00Z"
    })
}

fn bench_cache_set(c: &mut Criterion) {
    let (cache, rt) = setup_cache();

    let mut group = c.benchmark_group("cache_set");
    group.measurement_time(Duration::from_secs(10));

    for size in &[100, 1024, 10240, 102_400] {
        let data = test_data(*size);

        group.bench_with_input(BenchmarkId::new("json", size), size, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    let key = format!("bench:set:{}", rand::random::<u16>());
                    cache
                        .cache_manager()
                        .set(&key, black_box(&data), Some(Duration::from_secs(300)))
                        .await
                        .unwrap_or_else(|_| panic!("Failed to set cache"));
                });
            });
        });
    }

    group.finish();
}

fn bench_hit_vs_miss(c: &mut Criterion) {
    let (cache, rt) = setup_cache();
    let data = test_data(1024);
    rt.block_on(async {
        cache
            .cache_manager()
            .set("bench:hit", &data, None)
            .await
            .unwrap_or_else(|_| panic!("Failed to set cache"));
    });

    let mut group = c.benchmark_group("cache_get");

    group.bench_function("hit", |b| {
        b.iter(|| {
            rt.block_on(async {
                let value = cache
                    .cache_manager()
                    .get::<serde_json::Value>(black_box("bench:hit"))
                    .await
                    .unwrap_or_else(|_| panic!("Failed to get cache"));
                black_box(value);
            });
        });
    });

    group.bench_function("miss", |b| {
        b.iter(|| {
            rt.block_on(async {
                let value = cache
                    .cache_manager()
                    .get::<serde_json::Value>(black_box("bench:absent"))
                    .await
                    .unwrap_or_else(|_| panic!("Failed to get cache"));
                black_box(value);
            });
        });
    });

    group.bench_function("get_or_set_warm", |b| {
        b.iter(|| {
            rt.block_on(async {
                let value: u64 = cache
                    .cache_manager()
                    .get_or_set("bench:warm", || async { Ok(42) }, None)
                    .await
                    .unwrap_or_else(|_| panic!("get_or_set failed"));
                black_box(value);
            });
        });
    });

    group.finish();
}

fn bench_rate_limiter(c: &mut Criterion) {
    let (cache, rt) = setup_cache();

    c.bench_function("rate_limit_check", |b| {
        b.iter(|| {
            rt.block_on(async {
                let key = format!("ip:{}", rand::random::<u8>());
                let result = cache
                    .rate_limiter()
                    .check_rate_limit(&key, 1_000_000, Duration::from_secs(60))
                    .await;
                black_box(result);
            });
        });
    });
}

fn bench_delete_pattern(c: &mut Criterion) {
    let (cache, rt) = setup_cache();

    let mut group = c.benchmark_group("delete_pattern");
    for entries in &[100usize, 1_000, 5_000] {
        group.bench_with_input(BenchmarkId::from_parameter(entries), entries, |b, &entries| {
            b.iter(|| {
                rt.block_on(async {
                    for i in 0..entries {
                        let _ = cache.cache_manager().set(&format!("user:{i}"), &i, None).await;
                    }
                    let removed = cache
                        .cache_manager()
                        .delete_pattern("user:*")
                        .await
                        .unwrap_or_default();
                    black_box(removed);
                });
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_cache_set,
    bench_hit_vs_miss,
    bench_rate_limiter,
    bench_delete_pattern
);
criterion_main!(benches);
