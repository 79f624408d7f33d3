use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use tokio::time::Instant;
use tracing::{info, warn};

use super::queue::WorkQueue;
use crate::{error::SyncError, repository::ItemStore, service::Item};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PersisterReport {
    pub committed: u64,
    pub batches: u64,
    pub failed_batches: u64,
}

pub(crate) struct Persister<S> {
    // Shared with the blocking thread that runs each commit.
    store: Arc<Mutex<S>>,
    buffer: Vec<Item>,
    batch_size: usize,
    write_backoff: Duration,
    final_flush_attempts: u32,
    report: PersisterReport,
}

impl<S: ItemStore> Persister<S> {
    pub(crate) fn new(store: S, batch_size: usize, write_backoff: Duration, final_flush_attempts: u32) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            buffer: Vec::with_capacity(batch_size),
            batch_size,
            write_backoff,
            final_flush_attempts,
            report: PersisterReport::default(),
        }
    }

    /// Drains `item_queue` until it is closed, committing a batch whenever the buffer fills,
    /// then flushes whatever is left.
    ///
    /// Items are acknowledged once buffered. The buffer belongs to this task alone and is
    /// flushed before the task returns, so the coordinator's join cannot lose them.
    pub(crate) async fn run(mut self, item_queue: Arc<WorkQueue<Item>>) -> Result<PersisterReport, SyncError> {
        let mut window_start = Instant::now();
        while let Some(item) = item_queue.get().await {
            self.buffer.push(item);
            if self.buffer.len() < self.batch_size {
                item_queue.task_done();
                continue;
            }
            // The item that filled the buffer is acknowledged only after the batch is either
            // durable or back on the queue, so the queue never looks drained in between.
            let committed = match self.commit(window_start).await {
                Ok(()) => true,
                Err(e @ SyncError::PersistenceWrite { .. }) => {
                    warn!(backoff = ?self.write_backoff, "{e}");
                    self.report.failed_batches += 1;
                    item_queue.requeue_later(std::mem::take(&mut self.buffer), Duration::ZERO);
                    false
                }
                Err(e) => {
                    item_queue.task_done();
                    return Err(e);
                }
            };
            item_queue.task_done();
            if !committed {
                tokio::time::sleep(self.write_backoff).await;
            }
            window_start = Instant::now();
        }

        // Anything still queued after close is salvaged into the final flush.
        while let Some(item) = item_queue.try_get().await {
            self.buffer.push(item);
            item_queue.task_done();
        }
        self.flush(window_start).await?;
        Ok(self.report)
    }

    async fn flush(&mut self, window_start: Instant) -> Result<(), SyncError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let mut attempt = 1;
        loop {
            match self.commit(window_start).await {
                Ok(()) => return Ok(()),
                Err(e @ SyncError::PersistenceWrite { .. }) if attempt < self.final_flush_attempts => {
                    warn!(attempt, backoff = ?self.write_backoff, "final flush failed: {e}");
                    self.report.failed_batches += 1;
                    attempt += 1;
                    tokio::time::sleep(self.write_backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // The transaction may wait on a locked database, so it runs off the async workers.
    // A failed batch is put back into the buffer.
    async fn commit(&mut self, window_start: Instant) -> Result<(), SyncError> {
        let count = self.buffer.len();
        let store = Arc::clone(&self.store);
        let batch = std::mem::take(&mut self.buffer);
        let (mut batch, saved) = tokio::task::spawn_blocking(move || {
            let saved = store
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .save_items(&batch);
            (batch, saved)
        })
        .await?;
        if let Err(source) = saved {
            self.buffer = batch;
            return Err(SyncError::PersistenceWrite { count, source });
        }
        batch.clear();
        self.buffer = batch;
        let elapsed = window_start.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 { count as f64 / elapsed } else { count as f64 };
        info!(batch_size = count, "committed {} items; write rate: {:.3} items/s", count, rate);
        self.report.committed += count as u64;
        self.report.batches += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::StoreError, sync::tests::MemoryStore};

    /// Store whose writes hold the calling thread, like a transaction waiting on a lock.
    struct SlowStore {
        delay: Duration,
    }

    impl ItemStore for SlowStore {
        fn find_max_item_id(&mut self) -> Result<Option<i64>, StoreError> {
            Ok(None)
        }

        fn find_item_ids(&mut self, _from: i64, _bound: i64, _limit: usize) -> Result<Vec<i64>, StoreError> {
            Ok(vec![])
        }

        fn save_items(&mut self, _items: &[Item]) -> Result<(), StoreError> {
            std::thread::sleep(self.delay);
            Ok(())
        }
    }

    async fn persist(store: MemoryStore, ids: std::ops::RangeInclusive<i64>, batch_size: usize) -> PersisterReport {
        let item_queue = WorkQueue::new("items", 8);
        let persister = tokio::spawn(
            Persister::new(store, batch_size, Duration::from_millis(1), 3).run(Arc::clone(&item_queue)),
        );
        for id in ids {
            item_queue.put(Item::story(id, "t")).await.unwrap();
        }
        tokio::time::timeout(Duration::from_secs(5), item_queue.join()).await.unwrap();
        item_queue.close();
        persister.await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn commits_full_batches_and_flushes_the_rest() {
        let store = MemoryStore::default();
        let report = persist(store.clone(), 1..=237, 100).await;
        assert_eq!(report.committed, 237);
        assert_eq!(report.batches, 3);
        assert_eq!(store.batch_sizes(), vec![100, 100, 37]);
    }

    #[tokio::test]
    async fn flushes_partial_buffer_on_close() {
        let store = MemoryStore::default();
        let report = persist(store.clone(), 1..=37, 100).await;
        assert_eq!(report.committed, 37);
        assert_eq!(store.ids(), (1..=37).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn requeues_failed_batch() {
        let store = MemoryStore::default().failing_saves(1);
        let report = persist(store.clone(), 1..=25, 10).await;
        assert_eq!(report.failed_batches, 1);
        assert_eq!(report.committed, 25);
        assert_eq!(store.ids(), (1..=25).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn retries_final_flush() {
        let store = MemoryStore::default().failing_saves(2);
        let report = persist(store.clone(), 1..=5, 10).await;
        assert_eq!(report.committed, 5);
        assert_eq!(report.failed_batches, 2);
    }

    #[tokio::test]
    async fn final_flush_gives_up_eventually() {
        let store = MemoryStore::default().failing_saves(u32::MAX);
        let item_queue = WorkQueue::new("items", 8);
        let persister = tokio::spawn(
            Persister::new(store, 10, Duration::from_millis(1), 3).run(Arc::clone(&item_queue)),
        );
        item_queue.put(Item::story(1, "t")).await.unwrap();
        item_queue.join().await;
        item_queue.close();
        let result = persister.await.unwrap();
        assert!(matches!(result, Err(SyncError::PersistenceWrite { count: 1, .. })));
    }

    #[tokio::test]
    async fn slow_write_does_not_stall_other_tasks() {
        let store = SlowStore {
            delay: Duration::from_millis(500),
        };
        let item_queue = WorkQueue::new("items", 8);
        let persister = tokio::spawn(
            Persister::new(store, 1, Duration::from_millis(1), 3).run(Arc::clone(&item_queue)),
        );
        item_queue.put(Item::story(1, "t")).await.unwrap();
        let started = std::time::Instant::now();
        let ticker = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            started.elapsed()
        });

        let elapsed = ticker.await.unwrap();
        assert!(elapsed < Duration::from_millis(250), "ticker delayed by {elapsed:?}");

        item_queue.join().await;
        item_queue.close();
        assert_eq!(persister.await.unwrap().unwrap().committed, 1);
    }
}
