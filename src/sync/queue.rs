use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Error)]
#[error("queue {0} is closed")]
pub(crate) struct QueueClosed(&'static str);

/// Bounded multi-producer/multi-consumer queue that tracks unfinished work.
///
/// Every value put on the queue counts as outstanding until a consumer calls `task_done`
/// for it, so `join` returns only once all handed-out values are settled, not merely
/// dequeued. A consumer that hands work on (or re-queues it) must do so before calling
/// `task_done`, which keeps the count from touching zero in between.
pub(crate) struct WorkQueue<T> {
    name: &'static str,
    sender: mpsc::Sender<T>,
    receiver: Mutex<mpsc::Receiver<T>>,
    outstanding: AtomicUsize,
    drained: Notify,
    closed: CancellationToken,
}

impl<T: Send + 'static> WorkQueue<T> {
    pub(crate) fn new(name: &'static str, capacity: usize) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(capacity);
        Arc::new(Self {
            name,
            sender,
            receiver: Mutex::new(receiver),
            outstanding: AtomicUsize::new(0),
            drained: Notify::new(),
            closed: CancellationToken::new(),
        })
    }

    /// Waits for room when the queue is full.
    pub(crate) async fn put(&self, value: T) -> Result<(), QueueClosed> {
        self.check_open()?;
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        if self.sender.send(value).await.is_err() {
            self.task_done();
            return Err(QueueClosed(self.name));
        }
        Ok(())
    }

    /// Same as `put`, for producers running on a blocking thread.
    pub(crate) fn blocking_put(&self, value: T) -> Result<(), QueueClosed> {
        self.check_open()?;
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        if self.sender.blocking_send(value).is_err() {
            self.task_done();
            return Err(QueueClosed(self.name));
        }
        Ok(())
    }

    /// Puts `values` back after `delay` without blocking the caller.
    ///
    /// The values count as outstanding immediately, so a `join` in progress keeps waiting
    /// for them. Used by the queue's own consumers, which would deadlock on a full queue
    /// if they put synchronously.
    pub(crate) fn requeue_later(self: &Arc<Self>, values: Vec<T>, delay: Duration) {
        if values.is_empty() {
            return;
        }
        self.outstanding.fetch_add(values.len(), Ordering::AcqRel);
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            for value in values {
                if queue.sender.send(value).await.is_err() {
                    warn!(queue = queue.name, "dropped requeued value, receiver is gone");
                    queue.task_done();
                }
            }
        });
    }

    /// Next value, or `None` once the queue is closed.
    pub(crate) async fn get(&self) -> Option<T> {
        let mut receiver = self.receiver.lock().await;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            value = receiver.recv() => value,
        }
    }

    /// Next value if one is ready right now, closed or not.
    pub(crate) async fn try_get(&self) -> Option<T> {
        self.receiver.lock().await.try_recv().ok()
    }

    pub(crate) fn task_done(&self) {
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Resolves once nothing put on the queue is left unsettled.
    pub(crate) async fn join(&self) {
        loop {
            let drained = self.drained.notified();
            if self.outstanding() == 0 {
                return;
            }
            drained.await;
        }
    }

    /// Wakes every waiting consumer with `None` and rejects further puts.
    pub(crate) fn close(&self) {
        self.closed.cancel();
    }

    fn check_open(&self) -> Result<(), QueueClosed> {
        if self.closed.is_cancelled() {
            return Err(QueueClosed(self.name));
        }
        Ok(())
    }
}
