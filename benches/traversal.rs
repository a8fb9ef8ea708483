//! Performance benchmarks for graph traversal (`related`/`path`)

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mnemosyne::{Category, Direction, EngineConfig, MemoryId, MemoryManager, RelationType, Storage};
use tokio::runtime::Runtime;

fn create_graph(rt: &Runtime, mgr: &MemoryManager, branching_factor: usize, max_depth: usize) -> MemoryId {
    rt.block_on(async {
        let root_id = mgr.store("Memory 0", Some(Category::Semantic), None, None, None).await.unwrap();
        let mut current_level = vec![root_id];
        let mut counter = 1;

        for _depth in 0..max_depth {
            let mut next_level = Vec::new();
            for &parent_id in &current_level {
                for _ in 0..branching_factor {
                    let child_id = mgr.store(format!("Memory {counter}"), Some(Category::Semantic), None, None, None).await.unwrap();
                    counter += 1;
                    mgr.link(parent_id, child_id, RelationType::Related, None).await.unwrap();
                    next_level.push(child_id);
                }
            }
            current_level = next_level;
        }
        root_id
    })
}

fn bench_related_traversal(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let storage = Storage::open_in_memory(64).unwrap();
    let mgr = MemoryManager::new(storage, EngineConfig::dev_default()).unwrap();
    // depth 3, branching factor 5 (~156 nodes)
    let root_id = create_graph(&rt, &mgr, 5, 3);

    let mut group = c.benchmark_group("traversal");

    group.bench_function("related_depth_3", |b| {
        b.to_async(&rt).iter(|| async {
            mgr.related(black_box(root_id), 3, None, Direction::Out, Some(1000)).await.unwrap()
        })
    });

    group.bench_function("path_between_leaves", |b| {
        b.to_async(&rt).iter(|| async { mgr.path(black_box(root_id), black_box(root_id), 6).await.unwrap() })
    });

    group.finish();
}

criterion_group!(benches, bench_related_traversal);
criterion_main!(benches);
