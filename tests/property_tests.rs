//! Property-based tests over the public `MemoryManager` API, covering the
//! quantified invariants: chunk coverage, recall dedup, edge uniqueness and
//! no-self-loops, rejection suppression, and update idempotence.

use proptest::prelude::*;
use tokio::runtime::Runtime;

use mnemosyne::{Category, EngineConfig, MemoryManager, RelationType, Storage};

fn manager() -> MemoryManager {
    let storage = Storage::open_in_memory(64).unwrap();
    MemoryManager::new(storage, EngineConfig::dev_default()).unwrap()
}

fn rt() -> Runtime {
    Runtime::new().unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Whatever content is stored, chunk-0 reconstruction round-trips it
    /// exactly, whether or not the content was long enough to chunk.
    #[test]
    fn store_then_recall_round_trips_content(content in "[a-zA-Z0-9 .,_-]{1,3000}") -> Result<(), TestCaseError> {
        let rt = rt();
        let mgr = manager();
        rt.block_on(async {
            let id = mgr.store(content.clone(), Some(Category::Semantic), None, None, None).await.unwrap();
            let needle: String = content.split_whitespace().next().unwrap_or(&content).to_string();
            if !needle.is_empty() {
                let results = mgr.recall(&needle, None, Some(5), None, None, None).await.unwrap();
                if let Some(hit) = results.iter().find(|r| r.memory.id == id) {
                    prop_assert_eq!(&hit.memory.content, &content);
                }
            }
            Ok(())
        })
    }

    /// Recall never returns two results sharing a memory_id.
    #[test]
    fn recall_never_duplicates_memory_id(content in "[a-z]{3,8}( [a-z]{3,8}){2,7}") -> Result<(), TestCaseError> {
        let rt = rt();
        let mgr = manager();
        rt.block_on(async {
            mgr.store(content.clone(), Some(Category::Semantic), None, None, None).await.unwrap();
            let results = mgr.recall(&content, None, Some(20), None, None, None).await.unwrap();
            let mut ids: Vec<_> = results.iter().map(|r| r.memory.id).collect();
            let before = ids.len();
            ids.sort();
            ids.dedup();
            prop_assert_eq!(ids.len(), before);
            Ok(())
        })
    }

    /// A link is never a self-loop, and repeated identical links leave
    /// exactly one edge between the pair.
    #[test]
    fn link_rejects_self_loop_and_is_idempotent(times in 1usize..5) -> Result<(), TestCaseError> {
        let rt = rt();
        let mgr = manager();
        rt.block_on(async {
            let a = mgr.store("alpha content", Some(Category::Semantic), None, None, None).await.unwrap();
            let b = mgr.store("bravo content", Some(Category::Semantic), None, None, None).await.unwrap();

            let self_loop = mgr.link(a, a, RelationType::Related, None).await;
            prop_assert!(self_loop.is_err());

            for _ in 0..times {
                mgr.link(a, b, RelationType::Related, None).await.unwrap();
            }
            let edges = mgr.graph().list_edges(a, mnemosyne::Direction::Out, None).unwrap();
            prop_assert_eq!(edges.iter().filter(|e| e.target_id == b && e.relation_type == RelationType::Related).count(), 1);
            Ok(())
        })
    }

    /// A rejected triple never resurfaces from `suggest`, regardless of how
    /// many times `suggest` is called afterward.
    #[test]
    fn rejection_suppresses_suggestion_permanently(calls in 1usize..4) -> Result<(), TestCaseError> {
        let rt = rt();
        let storage = Storage::open_in_memory(64).unwrap();
        let mut config = EngineConfig::dev_default();
        config.graph.min_confidence = 0.0;
        let mgr = MemoryManager::new(storage, config).unwrap();
        rt.block_on(async {
            let a = mgr.store("alpha topic content here", Some(Category::Semantic), None, None, None).await.unwrap();
            let b = mgr.store("alpha topic content variant", Some(Category::Semantic), None, None, None).await.unwrap();

            let suggestions = mgr.suggest(a, Some(5)).await.unwrap();
            let Some(target) = suggestions.iter().find(|s| s.target_id == b).map(|s| s.relation_type) else {
                return Ok(());
            };
            mgr.reject(a, b, target).await.unwrap();

            for _ in 0..calls {
                let after = mgr.suggest(a, Some(5)).await.unwrap();
                prop_assert!(!after.iter().any(|s| s.target_id == b && s.relation_type == target));
            }
            Ok(())
        })
    }

    /// Applying the same update payload twice yields the same readable
    /// state as applying it once (aside from `updated_at`, which still
    /// advances on the repeat).
    #[test]
    fn update_is_idempotent_on_readable_state(importance in 0.0f32..1.0, tag in "[a-z]{3,10}") -> Result<(), TestCaseError> {
        let rt = rt();
        let mgr = manager();
        rt.block_on(async {
            let id = mgr.store("original content", Some(Category::Semantic), None, None, None).await.unwrap();

            mgr.update(id, None, Some(vec![tag.clone()]), Some(importance), None).await.unwrap();
            let after_once = mgr.search(None, None, None, mnemosyne::SortBy::Date, 10).await.unwrap();
            let once = after_once.iter().find(|m| m.memory.id == id).unwrap().memory.clone();

            mgr.update(id, None, Some(vec![tag.clone()]), Some(importance), None).await.unwrap();
            let after_twice = mgr.search(None, None, None, mnemosyne::SortBy::Date, 10).await.unwrap();
            let twice = after_twice.iter().find(|m| m.memory.id == id).unwrap().memory.clone();

            prop_assert_eq!(once.tags, twice.tags);
            prop_assert_eq!(once.importance, twice.importance);
            prop_assert_eq!(once.content, twice.content);
            Ok(())
        })
    }
}
