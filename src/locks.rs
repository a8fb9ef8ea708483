//! Per-id serialization for memory operations
//!
//! `store`/`update`/`delete` on the same `memory_id` must never interleave;
//! `recall`/`search` take no lock. Implemented as a sharded map of mutexes
//! keyed by `memory_id`, using `dashmap` for low-contention internal state.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

/// A table of per-id async mutexes. Entries are created lazily and kept
/// around for the process lifetime (memory ids are not reused, so the
/// table grows with the number of distinct memories ever touched).
#[derive(Default)]
pub struct LockTable {
    locks: DashMap<Uuid, Arc<AsyncMutex<()>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    fn entry(&self, id: Uuid) -> Arc<AsyncMutex<()>> {
        self.locks
            .entry(id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Acquire the lock for `id`, holding it until the returned guard drops.
    pub async fn acquire(&self, id: Uuid) -> LockGuard {
        let mutex = self.entry(id);
        // SAFETY-by-construction: the guard holds an Arc keeping the mutex
        // alive for as long as the guard lives, even if concurrently
        // re-inserted by another acquire call on the same id.
        let guard = mutex.lock_owned().await;
        LockGuard { _guard: guard }
    }
}

pub struct LockGuard {
    _guard: tokio::sync::OwnedMutexGuard<()>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_id_serializes() {
        let table = Arc::new(LockTable::new());
        let id = Uuid::new_v4();
        let order = Arc::new(AsyncMutex::new(Vec::new()));

        let t1 = {
            let table = table.clone();
            let order = order.clone();
            tokio::spawn(async move {
                let _g = table.acquire(id).await;
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                order.lock().await.push(1);
            })
        };
        let t2 = {
            let table = table.clone();
            let order = order.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                let _g = table.acquire(id).await;
                order.lock().await.push(2);
            })
        };

        t1.await.unwrap();
        t2.await.unwrap();
        // t1 held the lock first, so it must have recorded first.
        assert_eq!(*order.lock().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn distinct_ids_run_concurrently() {
        let table = LockTable::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let _ga = table.acquire(a).await;
        // Should not deadlock: distinct id, distinct mutex.
        let _gb = table.acquire(b).await;
    }
}
