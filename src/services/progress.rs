//! Bulk job progress tracking
//!
//! The orchestrator reports through the [`ProgressStore`] trait so the
//! in-process map can be swapped for a shared backing store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::types::BulkProgress;

#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Start tracking a job; replaces any earlier entry with the same id
    async fn create(&self, job_id: &str, total: u32);

    /// One more unit done, never past `total`
    async fn increment(&self, job_id: &str);

    async fn get(&self, job_id: &str) -> Option<BulkProgress>;

    async fn mark_done(&self, job_id: &str);

    /// Drop the entry once `after` has elapsed
    async fn expire(&self, job_id: &str, after: Duration);
}

struct Entry {
    progress: BulkProgress,
    /// Bumped on every `create`, so a stale expiry never removes a newer job
    generation: u64,
}

#[derive(Clone, Default)]
pub struct InMemoryProgressStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    generations: Arc<Mutex<u64>>,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_generation(&self) -> u64 {
        let mut generation = self.generations.lock();
        *generation += 1;
        *generation
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn create(&self, job_id: &str, total: u32) {
        let generation = self.next_generation();
        self.entries.lock().insert(
            job_id.to_string(),
            Entry {
                progress: BulkProgress { processed: 0, total, done: false },
                generation,
            },
        );
    }

    async fn increment(&self, job_id: &str) {
        if let Some(entry) = self.entries.lock().get_mut(job_id) {
            let p = &mut entry.progress;
            p.processed = (p.processed + 1).min(p.total);
        }
    }

    async fn get(&self, job_id: &str) -> Option<BulkProgress> {
        self.entries.lock().get(job_id).map(|e| e.progress)
    }

    async fn mark_done(&self, job_id: &str) {
        if let Some(entry) = self.entries.lock().get_mut(job_id) {
            entry.progress.done = true;
        }
    }

    async fn expire(&self, job_id: &str, after: Duration) {
        let generation = match self.entries.lock().get(job_id) {
            Some(entry) => entry.generation,
            None => return,
        };

        let entries = Arc::clone(&self.entries);
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let mut entries = entries.lock();
            if entries.get(&job_id).map(|e| e.generation) == Some(generation) {
                entries.remove(&job_id);
                debug!("Progress entry {} expired", job_id);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemoryProgressStore::new();
        store.create("job", 3).await;
        assert_eq!(
            store.get("job").await,
            Some(BulkProgress { processed: 0, total: 3, done: false })
        );
        assert!(store.get("other").await.is_none());
    }

    #[tokio::test]
    async fn test_increment_clamps_at_total() {
        let store = InMemoryProgressStore::new();
        store.create("job", 2).await;
        for _ in 0..5 {
            store.increment("job").await;
        }
        assert_eq!(store.get("job").await.unwrap().processed, 2);
    }

    #[tokio::test]
    async fn test_increment_unknown_job_is_noop() {
        let store = InMemoryProgressStore::new();
        store.increment("missing").await;
        assert!(store.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_mark_done() {
        let store = InMemoryProgressStore::new();
        store.create("job", 1).await;
        store.mark_done("job").await;
        assert!(store.get("job").await.unwrap().done);
    }

    #[tokio::test]
    async fn test_expire_removes_entry_after_delay() {
        let store = InMemoryProgressStore::new();
        store.create("job", 1).await;
        store.expire("job", Duration::from_millis(100)).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.get("job").await.is_some());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(store.get("job").await.is_none());
    }

    #[tokio::test]
    async fn test_stale_expiry_keeps_recreated_job() {
        let store = InMemoryProgressStore::new();
        store.create("job", 1).await;
        store.expire("job", Duration::from_millis(30)).await;
        store.create("job", 4).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.get("job").await.unwrap().total, 4);
    }
}
