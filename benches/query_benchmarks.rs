use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use futures::FutureExt;
use query_cache::{Client, ClientConfig, EntryOptions, Fetcher, IntoKey, Key, MutationFn, MutationOptions};

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
struct BenchUser {
    id: u32,
    name: String,
    email: String,
}

fn fetch_user(id: u32) -> Fetcher<BenchUser> {
    Arc::new(move |_ctx| {
        async move {
            Ok(BenchUser {
                id,
                name: format!("User {id}"),
                email: format!("user{id}@example.com"),
            })
        }
        .boxed()
    })
}

/// Runs an async closure to completion on a throwaway multi-thread runtime,
/// the same bridge criterion's own benches use for futures-returning targets.
fn block_on<F: Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("build bench runtime")
        .block_on(fut)
}

fn fresh_cache_options() -> EntryOptions {
    EntryOptions {
        stale_time: Duration::from_secs(60),
        ..EntryOptions::default()
    }
}

fn benchmark_query_creation(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_creation");

    group.bench_function("fetch_new_entry", |b| {
        b.iter(|| {
            block_on(async {
                let client = Client::new(ClientConfig::default());
                let user = client.fetch(["users", "1"].into_key(), fetch_user(1), None).await.unwrap();
                black_box(user);
            });
        });
    });

    group.finish();
}

fn benchmark_query_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_cache");

    group.bench_function("cache_hit_skips_fetch", |b| {
        b.iter(|| {
            block_on(async {
                let client = Client::new(ClientConfig::default());
                let key = ["users", "1"].into_key();
                client.fetch(key.clone(), fetch_user(1), Some(fresh_cache_options())).await.unwrap();
                // Second call should see the entry as fresh and skip the fetcher entirely.
                let cached = client.fetch(key, fetch_user(1), Some(fresh_cache_options())).await.unwrap();
                black_box(cached);
            });
        });
    });

    group.finish();
}

fn benchmark_concurrent_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_queries");

    group.bench_function("ten_distinct_keys", |b| {
        b.iter(|| {
            block_on(async {
                let client = Client::new(ClientConfig::default());
                let futures = (1..=10u32).map(|id| {
                    let client = client.clone();
                    async move { client.fetch(["users", &id.to_string()].into_key(), fetch_user(id), None).await }
                });
                let results = futures::future::join_all(futures).await;
                black_box(results);
            });
        });
    });

    group.finish();
}

fn benchmark_query_invalidation(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_invalidation");

    group.bench_function("invalidate_single", |b| {
        b.iter(|| {
            block_on(async {
                let client = Client::new(ClientConfig::default());
                let key = ["users", "1"].into_key();
                client.fetch(key.clone(), fetch_user(1), None).await.unwrap();
                let filter = query_cache::entry::cache::EntryFilter {
                    key: Some(key),
                    ..Default::default()
                };
                client.invalidate(&filter, query_cache::InvalidateOptions::default()).await;
            });
        });
    });

    group.bench_function("invalidate_pattern", |b| {
        b.iter(|| {
            block_on(async {
                let client = Client::new(ClientConfig::default());
                for id in 1..=10u32 {
                    client.fetch(["users", &id.to_string()].into_key(), fetch_user(id), None).await.unwrap();
                }
                let filter = query_cache::entry::cache::EntryFilter {
                    key: Some(["users"].into_key()),
                    ..Default::default()
                };
                client.invalidate(&filter, query_cache::InvalidateOptions::default()).await;
            });
        });
    });

    group.finish();
}

fn benchmark_mutations(c: &mut Criterion) {
    let mut group = c.benchmark_group("mutations");

    let create_user: MutationFn<(String, String), BenchUser> = Arc::new(|(name, email)| {
        async move {
            Ok(BenchUser {
                id: rand::random::<u32>(),
                name,
                email,
            })
        }
        .boxed()
    });

    group.bench_function("run_to_completion", |b| {
        b.iter(|| {
            block_on(async {
                let client = Client::new(ClientConfig::default());
                let (_, run) = client.mutate::<(String, String), BenchUser, ()>(
                    create_user.clone(),
                    MutationOptions::default(),
                    ("Ada".to_string(), "ada@example.com".to_string()),
                );
                black_box(run.await.unwrap());
            });
        });
    });

    group.finish();
}

fn benchmark_memory_usage(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_usage");

    group.bench_function("large_dataset", |b| {
        b.iter(|| {
            block_on(async {
                let client = Client::new(ClientConfig::default());
                let futures = (1..=100u32).map(|id| {
                    let client = client.clone();
                    async move { client.fetch(["users", &id.to_string()].into_key(), fetch_user(id), None).await }
                });
                let results = futures::future::join_all(futures).await;
                black_box(results);
            });
        });
    });

    group.finish();
}

fn benchmark_query_keys(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_keys");

    group.bench_function("simple_key_hash", |b| {
        b.iter(|| {
            let key: Key = ["users", "1"].into_key();
            black_box(key.hash());
        });
    });

    group.bench_function("complex_key_hash", |b| {
        b.iter(|| {
            let key: Key = ["users", "1", "posts", "comments"].into_key();
            black_box(key.hash());
        });
    });

    group.bench_function("dynamic_key_hash", |b| {
        b.iter(|| {
            let user_id = 1u32;
            let key: Key = ["users", &user_id.to_string()].into_key();
            black_box(key.hash());
        });
    });

    group.finish();
}

criterion_group!(
    name = benches;
    config = Criterion::default()
        .sample_size(10)
        .measurement_time(Duration::from_secs(5))
        .warm_up_time(Duration::from_secs(2));
    targets =
        benchmark_query_creation,
        benchmark_query_cache,
        benchmark_concurrent_queries,
        benchmark_query_invalidation,
        benchmark_mutations,
        benchmark_memory_usage,
        benchmark_query_keys
);

criterion_main!(benches);
