//! Performance benchmarks for recall/search at various corpus sizes

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mnemosyne::{Category, EngineConfig, MemoryManager, Storage};
use tokio::runtime::Runtime;

const SAMPLE_CONTENTS: &[&str] = &[
    "Authentication using JWT tokens and refresh mechanism",
    "Database migration strategy for PostgreSQL",
    "React component lifecycle and hooks optimization",
    "API rate limiting implementation with Redis",
    "Docker container orchestration with Kubernetes",
    "GraphQL schema design best practices",
    "Microservices communication patterns",
    "CI/CD pipeline configuration with GitHub Actions",
    "Memory leak detection in Node.js applications",
    "Rust ownership and borrowing concepts",
];

fn setup_manager(rt: &Runtime, count: usize) -> MemoryManager {
    let storage = Storage::open_in_memory(64).unwrap();
    let mgr = MemoryManager::new(storage, EngineConfig::dev_default()).unwrap();

    rt.block_on(async {
        for i in 0..count {
            let content = format!(
                "{} - variation {} with additional context about software development",
                SAMPLE_CONTENTS[i % SAMPLE_CONTENTS.len()],
                i
            );
            mgr.store(
                content,
                Some(Category::Semantic),
                Some(vec![format!("topic{}", i % 5), "development".to_string()]),
                Some((i % 10) as f32 / 10.0),
                None,
            )
            .await
            .unwrap();
        }
    });

    mgr
}

fn bench_recall(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mgr = setup_manager(&rt, 1000);

    let mut group = c.benchmark_group("recall");

    let queries = ["authentication", "database migration", "React hooks optimization", "API rate limiting Redis"];

    for query in queries {
        group.bench_with_input(BenchmarkId::new("query", query), &query, |b, query| {
            b.to_async(&rt).iter(|| async move { mgr.recall(black_box(query), None, Some(10), None, None, None).await.unwrap() })
        });
    }

    group.finish();
}

fn bench_recall_with_text_match(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mgr = setup_manager(&rt, 1000);

    let mut group = c.benchmark_group("recall_text_match");

    let queries = [
        ("short", "auth"),
        ("medium", "database migration strategy"),
        ("long", "how to implement authentication with JWT tokens and refresh mechanism"),
    ];

    for (name, query) in queries {
        group.bench_with_input(BenchmarkId::new("query_type", name), &query, |b, query| {
            b.to_async(&rt)
                .iter(|| async move { mgr.recall(black_box(query), None, Some(10), None, Some("development"), None).await.unwrap() })
        });
    }

    group.finish();
}

fn bench_recall_at_scale(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("recall_scale");
    group.sample_size(20);

    for &size in &[100, 1000, 5000] {
        let mgr = setup_manager(&rt, size);
        let query = "authentication JWT tokens";

        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("memories", size), &query, |b, query| {
            b.to_async(&rt).iter(|| async move { mgr.recall(black_box(query), None, Some(10), None, None, None).await.unwrap() })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_recall, bench_recall_with_text_match, bench_recall_at_scale);
criterion_main!(benches);
