use std::{sync::Arc, time::Duration};

use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use super::queue::WorkQueue;
use crate::{config::RetryPolicy, error::SyncError, service::Item, service::ItemSource};

/// An id waiting to be fetched, with the number of failed attempts so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FetchTask {
    pub id: i64,
    pub failures: u32,
}

impl FetchTask {
    pub(crate) fn new(id: i64) -> Self {
        Self { id, failures: 0 }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WorkerReport {
    pub fetched: u64,
    pub missing: u64,
    pub retried: u64,
    pub abandoned: u64,
}

impl std::ops::AddAssign for WorkerReport {
    fn add_assign(&mut self, other: Self) {
        self.fetched += other.fetched;
        self.missing += other.missing;
        self.retried += other.retried;
        self.abandoned += other.abandoned;
    }
}

/// One fetch worker. Runs until `id_queue` is closed.
///
/// An id is acknowledged on the id queue only after its item was accepted by `item_queue`
/// (or after it was re-queued, or given up on), so it stays outstanding while in flight.
pub(crate) async fn run<S: ItemSource + ?Sized>(
    worker: usize,
    source: Arc<S>,
    id_queue: Arc<WorkQueue<FetchTask>>,
    item_queue: Arc<WorkQueue<Item>>,
    retry: RetryPolicy,
    abandoned_ids: mpsc::UnboundedSender<i64>,
) -> WorkerReport {
    let mut report = WorkerReport::default();
    while let Some(task) = id_queue.get().await {
        match source.item(task.id).await {
            Ok(Some(item)) => {
                debug!(worker, id = task.id, "fetched item");
                if let Err(e) = item_queue.put(item).await {
                    error!(worker, id = task.id, "could not hand over item: {e}");
                    id_queue.task_done();
                    break;
                }
                report.fetched += 1;
            }
            Ok(None) => {
                debug!(worker, id = task.id, "no item to save");
                report.missing += 1;
            }
            Err(fetch_error) => {
                let failures = task.failures + 1;
                let e = SyncError::TransientFetch {
                    id: task.id,
                    source: fetch_error,
                };
                if retry.allows(failures) {
                    let delay = jittered(retry.delay(failures));
                    warn!(worker, id = task.id, failures, ?delay, "{e}");
                    id_queue.requeue_later(vec![FetchTask { id: task.id, failures }], delay);
                    report.retried += 1;
                } else {
                    error!(worker, id = task.id, failures, "giving up: {e}");
                    let _ = abandoned_ids.send(task.id);
                    report.abandoned += 1;
                }
            }
        }
        id_queue.task_done();
    }
    report
}

// Up to 10% extra so that a burst of failures does not retry in lockstep.
fn jittered(delay: Duration) -> Duration {
    let millis = delay.as_millis() as u64;
    if millis < 10 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=millis / 10))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::tests::MemorySource;

    fn retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    async fn drive(source: MemorySource, ids: &[i64], max_attempts: u32) -> (WorkerReport, Vec<i64>, Vec<i64>) {
        let id_queue = WorkQueue::new("ids", 16);
        let item_queue = WorkQueue::new("items", 16);
        let (abandoned_sender, mut abandoned_receiver) = mpsc::unbounded_channel();
        for id in ids {
            id_queue.put(FetchTask::new(*id)).await.unwrap();
        }
        let worker = tokio::spawn(run(
            0,
            Arc::new(source),
            Arc::clone(&id_queue),
            Arc::clone(&item_queue),
            retry(max_attempts),
            abandoned_sender,
        ));
        tokio::time::timeout(Duration::from_secs(5), id_queue.join()).await.unwrap();
        id_queue.close();
        let report = worker.await.unwrap();

        let mut fetched = vec![];
        while let Some(item) = item_queue.try_get().await {
            fetched.push(item.id);
        }
        fetched.sort();
        let mut abandoned = vec![];
        while let Ok(id) = abandoned_receiver.try_recv() {
            abandoned.push(id);
        }
        (report, fetched, abandoned)
    }

    #[tokio::test]
    async fn forwards_items_and_skips_missing_ones() {
        let source = MemorySource::with_stories(1..=3).without(2);
        let (report, fetched, abandoned) = drive(source, &[1, 2, 3], 3).await;
        assert_eq!(fetched, vec![1, 3]);
        assert!(abandoned.is_empty());
        assert_eq!(report.fetched, 2);
        assert_eq!(report.missing, 1);
    }

    #[tokio::test]
    async fn retries_failed_fetches() {
        let source = MemorySource::with_stories(1..=2).failing(2, 2);
        let (report, fetched, abandoned) = drive(source, &[1, 2], 5).await;
        assert_eq!(fetched, vec![1, 2]);
        assert!(abandoned.is_empty());
        assert_eq!(report.retried, 2);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let source = MemorySource::with_stories(1..=2).failing(1, u32::MAX);
        let (report, fetched, abandoned) = drive(source, &[1, 2], 3).await;
        assert_eq!(fetched, vec![2]);
        assert_eq!(abandoned, vec![1]);
        assert_eq!(report.retried, 2);
        assert_eq!(report.abandoned, 1);
    }
}
