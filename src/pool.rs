use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::models::VoteRecord;
use crate::store::VoteStore;

/// Fixed-size pool for store writes, shared by every import in the process.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionFailure {
    pub index: usize,
    pub records: usize,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct PersistReport {
    pub partitions: usize,
    pub persisted: usize,
    pub failures: Vec<PartitionFailure>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            tracker: TaskTracker::new(),
            size,
        }
    }

    pub fn with_available_parallelism() -> Self {
        Self::new(available_parallelism())
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Runs `task` once a worker slot is free.
    pub fn spawn<F, T>(&self, task: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permits = self.permits.clone();
        self.tracker.spawn(async move {
            let _permit = permits.acquire_owned().await;
            task.await
        })
    }

    /// Waits for every task submitted so far to finish.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Splits `records` into at most `size` contiguous partitions, writes
    /// each on its own worker and waits for all of them. A failed partition
    /// is reported and does not undo the others.
    pub async fn persist_partitioned(
        &self,
        store: Arc<dyn VoteStore>,
        records: Vec<VoteRecord>,
        retries: usize,
    ) -> PersistReport {
        let total = records.len();
        let partitions = partition(records, self.size);
        let mut report = PersistReport {
            partitions: partitions.len(),
            ..Default::default()
        };
        info!(records = total, partitions = report.partitions, "persisting votes");

        let handles: Vec<_> = partitions
            .into_iter()
            .enumerate()
            .map(|(index, part)| {
                let store = store.clone();
                let len = part.len();
                let handle = self.spawn(async move { save_with_retry(store.as_ref(), &part, retries).await });
                (index, len, handle)
            })
            .collect();

        for (index, len, handle) in handles {
            let outcome = match handle.await {
                Ok(Ok(saved)) => Ok(saved),
                Ok(Err(err)) => Err(err.to_string()),
                Err(err) => Err(err.to_string()),
            };

            match outcome {
                Ok(saved) => report.persisted += saved,
                Err(error) => {
                    error!(partition = index, records = len, %error, "partition failed to persist");
                    report.failures.push(PartitionFailure {
                        index,
                        records: len,
                        error,
                    });
                }
            }
        }

        info!(
            persisted = report.persisted,
            failed_partitions = report.failures.len(),
            workers = self.size,
            "persist finished"
        );
        report
    }
}

async fn save_with_retry(
    store: &dyn VoteStore,
    records: &[VoteRecord],
    retries: usize,
) -> crate::error::Result<usize> {
    let mut attempt = 0;
    loop {
        match store.save_all(records).await {
            Ok(saved) => return Ok(saved),
            Err(err) if attempt < retries => {
                attempt += 1;
                warn!(attempt, error = %err, "retrying partition write");
            }
            Err(err) => return Err(err),
        }
    }
}

pub fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Contiguous partitions of near-equal size, never more than `parts`.
pub fn partition<T>(mut items: Vec<T>, parts: usize) -> Vec<Vec<T>> {
    if items.is_empty() {
        return Vec::new();
    }
    let chunk = items.len().div_ceil(parts.max(1));
    let mut partitions = Vec::with_capacity(parts.min(items.len()));

    while !items.is_empty() {
        let tail = items.split_off(chunk.min(items.len()));
        partitions.push(items);
        items = tail;
    }

    partitions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::store::memory::InMemoryVoteStore;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn votes(count: usize) -> Vec<VoteRecord> {
        let date = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
        (0..count)
            .map(|i| VoteRecord {
                vote_date: date,
                song_name: format!("Song {}", i % 7),
                song_id: format!("song-{}", i % 7),
                artist_name: "Artist".to_string(),
                artist_id: "artist-1".to_string(),
                user_id: format!("user-{i}"),
                rating: (i % 5) as i32 + 1,
                genre: "pop".to_string(),
            })
            .collect()
    }

    fn sorted(mut records: Vec<VoteRecord>) -> Vec<VoteRecord> {
        records.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        records
    }

    #[test]
    fn partitions_are_contiguous_and_bounded() {
        let parts = partition((0..10).collect::<Vec<_>>(), 4);
        assert_eq!(parts, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6, 7, 8], vec![9]]);

        let parts = partition(vec![1, 2], 8);
        assert_eq!(parts, vec![vec![1], vec![2]]);

        assert!(partition(Vec::<u8>::new(), 3).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_record_is_persisted_exactly_once_for_any_worker_count() {
        let input = votes(23);

        for workers in 1..=input.len() {
            let store = Arc::new(InMemoryVoteStore::default());
            let pool = WorkerPool::new(workers);

            let report = pool.persist_partitioned(store.clone(), input.clone(), 0).await;

            assert!(report.failures.is_empty());
            assert!(report.partitions <= workers);
            assert_eq!(report.persisted, input.len());
            assert_eq!(sorted(store.snapshot()), sorted(input.clone()), "workers = {workers}");
        }
    }

    struct FlakyStore {
        inner: InMemoryVoteStore,
        poisoned_user: String,
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl VoteStore for FlakyStore {
        async fn save_all(&self, records: &[VoteRecord]) -> crate::error::Result<usize> {
            if records.iter().any(|vote| vote.user_id == self.poisoned_user)
                && self.failures_left.load(Ordering::SeqCst) > 0
            {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::Task("write rejected".to_string()));
            }
            self.inner.save_all(records).await
        }

        async fn average(
            &self,
            song_id: &str,
            since: NaiveDate,
            until: NaiveDate,
        ) -> crate::error::Result<Option<f64>> {
            self.inner.average(song_id, since, until).await
        }

        async fn distinct_song_ids(
            &self,
            since: NaiveDate,
            until: NaiveDate,
        ) -> crate::error::Result<Vec<String>> {
            self.inner.distinct_song_ids(since, until).await
        }

        async fn first_record_for_song(&self, song_id: &str) -> crate::error::Result<Option<VoteRecord>> {
            self.inner.first_record_for_song(song_id).await
        }
    }

    fn flaky(failures: usize) -> Arc<FlakyStore> {
        Arc::new(FlakyStore {
            inner: InMemoryVoteStore::default(),
            poisoned_user: "user-0".to_string(),
            failures_left: AtomicUsize::new(failures),
        })
    }

    #[tokio::test]
    async fn failed_partition_is_reported_without_undoing_others() {
        let store = flaky(usize::MAX);
        let pool = WorkerPool::new(4);

        let report = pool.persist_partitioned(store.clone(), votes(12), 0).await;

        assert_eq!(report.partitions, 4);
        assert_eq!(report.persisted, 9);
        assert_eq!(
            report.failures,
            vec![PartitionFailure {
                index: 0,
                records: 3,
                error: "background task failed: write rejected".to_string(),
            }]
        );
        assert_eq!(store.inner.snapshot().len(), 9);
    }

    #[tokio::test]
    async fn bounded_retry_recovers_transient_failures() {
        let store = flaky(2);
        let pool = WorkerPool::new(3);

        let report = pool.persist_partitioned(store.clone(), votes(9), 2).await;

        assert!(report.failures.is_empty());
        assert_eq!(report.persisted, 9);
    }

    #[tokio::test]
    async fn drain_waits_for_submitted_tasks() {
        let pool = WorkerPool::new(2);
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let done = done.clone();
            pool.spawn(async move {
                tokio::task::yield_now().await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        pool.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 5);
    }
}
