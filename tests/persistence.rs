//! Verifies the on-disk SQLite backing actually persists across process
//! restarts, not just within one `MemoryManager`'s lifetime.

use mnemosyne::{Category, EngineConfig, MemoryManager, Storage};

#[tokio::test]
async fn reopening_the_same_db_file_preserves_stored_memories() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("mnemosyne.db");
    let db_path = db_path.to_str().unwrap();

    let id = {
        let storage = Storage::open(db_path, 64).unwrap();
        let mgr = MemoryManager::new(storage, EngineConfig::dev_default()).unwrap();
        mgr.store("the deploy pipeline lives in .github/workflows", Some(Category::Semantic), None, Some(0.7), None)
            .await
            .unwrap()
    };

    let storage = Storage::open(db_path, 64).unwrap();
    let mgr = MemoryManager::new(storage, EngineConfig::dev_default()).unwrap();
    let results = mgr.recall("deploy pipeline workflows", None, Some(5), None, None, None).await.unwrap();

    assert!(results.iter().any(|r| r.memory.id == id));
}
