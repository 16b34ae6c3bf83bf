use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use link_preview::{DiskStore, MemoryCache, PreviewCache, PreviewData, DEFAULT_TTL};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

const MOCK_URLS: &[&str] = &[
    "https://example1.com/page1",
    "https://example2.com/page2",
    "https://example3.com/page3",
    "https://example4.com/page4",
    "https://example5.com/page5",
];

fn create_mock_preview(url: &str) -> PreviewData {
    PreviewData::new(url)
        .with_title(format!("Title for {url}"))
        .with_description(format!("Description for {url}"))
        .with_image_url("https://example.com/image.jpg")
        .with_icon_url("https://example.com/favicon.ico")
        .with_site_name("Example Site")
}

fn bench_memory_tier(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_tier");

    for &capacity in &[100usize, 500, 1000] {
        group.bench_with_input(BenchmarkId::new("hit", capacity), &capacity, |b, &cap| {
            let mut cache = MemoryCache::new(cap, usize::MAX);
            for url in MOCK_URLS {
                cache.insert(url.to_string(), create_mock_preview(url), 256);
            }
            b.iter(|| black_box(cache.get(MOCK_URLS[0]).cloned()));
        });

        group.bench_with_input(
            BenchmarkId::new("insert_with_eviction", capacity),
            &capacity,
            |b, &cap| {
                let mut cache = MemoryCache::new(cap, usize::MAX);
                let mut counter = 0usize;
                b.iter(|| {
                    counter += 1;
                    let url = format!("https://dynamic{counter}.example.com");
                    let preview = create_mock_preview(&url);
                    black_box(cache.insert(url, preview, 256))
                });
            },
        );
    }

    group.finish();
}

fn bench_two_tier_cache(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("two_tier_cache");
    group
        .sample_size(50)
        .measurement_time(Duration::from_secs(10))
        .warm_up_time(Duration::from_secs(3));

    let dir = tempfile::tempdir().unwrap();
    let cache = rt.block_on(async {
        let store = DiskStore::open(dir.path()).await.unwrap();
        let cache = Arc::new(PreviewCache::with_store(store, 1000, 8 * 1024 * 1024, DEFAULT_TTL));
        for url in MOCK_URLS {
            cache.set(url, create_mock_preview(url)).await.unwrap();
        }
        cache
    });

    group.bench_function("memory_hit", |b| {
        b.to_async(&rt).iter(|| {
            let cache = Arc::clone(&cache);
            async move { black_box(cache.get(MOCK_URLS[0]).await.unwrap()) }
        });
    });

    // Single-slot memory tier: alternating reads always go to disk.
    let cold_dir = tempfile::tempdir().unwrap();
    let cold = rt.block_on(async {
        let store = DiskStore::open(cold_dir.path()).await.unwrap();
        let cache = Arc::new(PreviewCache::with_store(store, 1, 8 * 1024 * 1024, DEFAULT_TTL));
        for url in MOCK_URLS {
            cache.set(url, create_mock_preview(url)).await.unwrap();
        }
        cache
    });

    group.bench_function("disk_promotion", |b| {
        let counter = AtomicUsize::new(0);
        b.to_async(&rt).iter(|| {
            let cold = Arc::clone(&cold);
            let url = MOCK_URLS[counter.fetch_add(1, Ordering::Relaxed) % MOCK_URLS.len()];
            async move { black_box(cold.get(url).await.unwrap()) }
        });
    });

    group.bench_function("write_through", |b| {
        let counter = AtomicUsize::new(0);
        b.to_async(&rt).iter(|| {
            let cache = Arc::clone(&cache);
            let current = counter.fetch_add(1, Ordering::SeqCst);
            let url = format!("https://dynamic{current}.example.com");
            async move {
                let preview = create_mock_preview(&url);
                black_box(cache.set(&url, preview).await.unwrap())
            }
        });
    });

    group.bench_function("concurrent_access", |b| {
        b.to_async(&rt).iter(|| {
            let cache = Arc::clone(&cache);
            async move {
                let handles: Vec<_> = MOCK_URLS
                    .iter()
                    .map(|&url| {
                        let cache = Arc::clone(&cache);
                        tokio::spawn(async move { cache.get(url).await })
                    })
                    .collect();

                for handle in handles {
                    black_box(handle.await.unwrap());
                }
            }
        });
    });

    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(50);
    targets = bench_memory_tier, bench_two_tier_cache
}
criterion_main!(benches);
