pub(crate) mod fetcher;
pub(crate) mod gap;
pub(crate) mod persister;
pub(crate) mod queue;

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{error, info};

use self::{
    fetcher::{FetchTask, WorkerReport},
    gap::LocalIds,
    persister::Persister,
    queue::WorkQueue,
};
use crate::{config::SyncConfig, error::SyncError, repository::ItemStore, service::ItemSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PipelineState {
    Starting,
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct SyncReport {
    pub start: i64,
    pub bound: i64,
    pub produced: u64,
    pub fetched: u64,
    pub missing: u64,
    pub retried: u64,
    pub committed: u64,
    pub batches: u64,
    pub failed_batches: u64,
    /// Ids that exhausted their fetch attempts; they stay absent locally until a later run.
    pub failed_ids: Vec<i64>,
    /// `(ids, items)` still outstanding when draining hit its time limit.
    pub incomplete: Option<(usize, usize)>,
}

/// One synchronization pass: `STARTING -> RUNNING -> DRAINING -> STOPPED`.
///
/// The remote bound is resolved once, gaps in `[start, bound)` are streamed into the id
/// queue by a blocking producer, `workers_num` fetchers move them to the item queue and a
/// single persister commits them. Shutdown only begins once both queues report no
/// outstanding work.
pub(crate) struct Pipeline {
    config: SyncConfig,
    state: PipelineState,
}

impl Pipeline {
    pub(crate) fn new(config: SyncConfig) -> Self {
        Self {
            config,
            state: PipelineState::Starting,
        }
    }

    pub(crate) fn state(&self) -> PipelineState {
        self.state
    }

    fn transition(&mut self, next: PipelineState) {
        info!(from = ?self.state, to = ?next, "pipeline state changed");
        self.state = next;
    }

    pub(crate) async fn run<S, R, W>(
        &mut self,
        source: Arc<S>,
        mut reader: R,
        writer: W,
        start: Option<i64>,
    ) -> Result<SyncReport, SyncError>
    where
        S: ItemSource + ?Sized + 'static,
        R: ItemStore,
        W: ItemStore,
    {
        let bound = source.max_item_id().await.map_err(SyncError::RemoteBound)?;
        let start = match start {
            Some(start) => start,
            None => reader
                .find_max_item_id()
                .map_err(SyncError::LocalScan)?
                .map_or(1, |id| id + 1),
        };
        info!(start, bound, "remote high water mark resolved");

        let id_queue = WorkQueue::new("ids", self.config.queue_capacity);
        let item_queue = WorkQueue::new("items", self.config.queue_capacity);
        let (abandoned_sender, mut abandoned_receiver) = mpsc::unbounded_channel();

        let producer = tokio::task::spawn_blocking({
            let id_queue = Arc::clone(&id_queue);
            let page_size = self.config.scan_page_size;
            move || produce(&mut reader, &id_queue, start, bound, page_size)
        });
        let workers = (0..self.config.workers_num)
            .map(|worker| {
                tokio::spawn(fetcher::run(
                    worker,
                    Arc::clone(&source),
                    Arc::clone(&id_queue),
                    Arc::clone(&item_queue),
                    self.config.retry.clone(),
                    abandoned_sender.clone(),
                ))
            })
            .collect::<Vec<_>>();
        drop(abandoned_sender);
        let persister = tokio::spawn(
            Persister::new(
                writer,
                self.config.batch_size,
                self.config.write_backoff,
                self.config.final_flush_attempts,
            )
            .run(Arc::clone(&item_queue)),
        );
        self.transition(PipelineState::Running);

        let (produced, scan_error) = producer.await?;
        info!(produced, "all gaps queued");
        self.transition(PipelineState::Draining);

        // Workers finish feeding the item queue before the id queue can settle, so the
        // order of the two joins matters.
        let drained = tokio::time::timeout(self.config.drain_timeout, async {
            id_queue.join().await;
            item_queue.join().await;
        })
        .await;
        let incomplete = match drained {
            Ok(()) => None,
            Err(_) => {
                let (ids, items) = (id_queue.outstanding(), item_queue.outstanding());
                error!("{}", SyncError::ShutdownIncomplete { ids, items });
                Some((ids, items))
            }
        };

        id_queue.close();
        let mut worker_report = WorkerReport::default();
        let mut worker_error = None;
        for worker in join_all(workers).await {
            match worker {
                Ok(report) => worker_report += report,
                Err(e) => {
                    error!("fetch worker failed: {e}");
                    worker_error.get_or_insert(e);
                }
            }
        }
        // The persister still flushes what the surviving workers handed over.
        item_queue.close();
        let persisted = persister.await?;
        self.transition(PipelineState::Stopped);

        let mut failed_ids = vec![];
        while let Some(id) = abandoned_receiver.recv().await {
            failed_ids.push(id);
        }
        failed_ids.sort_unstable();

        let persister_report = persisted?;
        if let Some(e) = worker_error {
            return Err(e.into());
        }
        if let Some(e) = scan_error {
            return Err(e);
        }
        Ok(SyncReport {
            start,
            bound,
            produced,
            fetched: worker_report.fetched,
            missing: worker_report.missing,
            retried: worker_report.retried,
            committed: persister_report.committed,
            batches: persister_report.batches,
            failed_batches: persister_report.failed_batches,
            failed_ids,
            incomplete,
        })
    }
}

// Runs on a blocking thread: the local scan is synchronous and `blocking_put` parks the
// thread while the id queue is full.
fn produce<R: ItemStore>(
    reader: &mut R,
    id_queue: &WorkQueue<FetchTask>,
    start: i64,
    bound: i64,
    page_size: usize,
) -> (u64, Option<SyncError>) {
    let mut produced = 0;
    for gap in gap::detect(LocalIds::new(reader, start, bound, page_size), start, bound) {
        let id = match gap {
            Ok(id) => id,
            Err(e) => {
                let e = SyncError::LocalScan(e);
                error!("{e}");
                return (produced, Some(e));
            }
        };
        if id_queue.blocking_put(FetchTask::new(id)).is_err() {
            break;
        }
        produced += 1;
    }
    (produced, None)
}
