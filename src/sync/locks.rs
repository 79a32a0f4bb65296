//! Per-category run exclusivity

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::types::Category;

/// One async mutex per category.
///
/// Overlapping runs (a startup pull and a manual sync, say) take turns on a
/// category instead of racing on its files.
#[derive(Default)]
pub struct SyncLocks {
    locks: DashMap<Category, Arc<Mutex<()>>>,
}

impl SyncLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, category: Category) -> Arc<Mutex<()>> {
        // Clone out so no map shard stays borrowed across an await.
        self.locks
            .entry(category)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for exclusive use of `category`
    pub async fn acquire(&self, category: Category) -> OwnedMutexGuard<()> {
        self.lock_for(category).lock_owned().await
    }

    /// Whether a run currently holds `category`
    pub fn is_busy(&self, category: Category) -> bool {
        self.lock_for(category).try_lock().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_category_serializes() {
        let locks = Arc::new(SyncLocks::new());
        let guard = locks.acquire(Category::Notes).await;
        assert!(locks.is_busy(Category::Notes));
        assert!(!locks.is_busy(Category::Images));

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.acquire(Category::Notes).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert!(!locks.is_busy(Category::Notes));
    }

    #[tokio::test]
    async fn test_distinct_categories_do_not_block() {
        let locks = SyncLocks::new();
        let _a = locks.acquire(Category::Notes).await;
        let _b = locks.acquire(Category::Templates).await;
        assert!(locks.is_busy(Category::Notes));
        assert!(locks.is_busy(Category::Templates));
    }
}
