use std::{sync::Arc, time::Instant};

use anyhow::{bail, Result};
use tracing::{info, warn};

use crate::{
    config::SyncConfig,
    error::SyncError,
    repository::Repository,
    service::hacker_news::HackerNews,
    sync::Pipeline,
};

pub(crate) async fn sync_items(database_path: &str, workers_num: usize, start: Option<i64>) -> Result<()> {
    let config = SyncConfig::from_env(workers_num)?;
    let source = Arc::new(HackerNews::new(&config.api_base_url, config.request_timeout)?);
    // The gap scan and the persister each get their own connection.
    let reader = Repository::new(database_path)?;
    let writer = Repository::new(database_path)?;
    let start_time = Instant::now();
    let mut pipeline = Pipeline::new(config);
    let report = pipeline.run(source, reader, writer, start).await?;
    let items_num = Repository::new(database_path)?.count_items()?;
    info!(
        state = ?pipeline.state(),
        items_num,
        start = report.start,
        bound = report.bound,
        produced = report.produced,
        fetched = report.fetched,
        missing = report.missing,
        retried = report.retried,
        batches = report.batches,
        failed_batches = report.failed_batches,
        elapsed_time = ?start_time.elapsed(),
        "committed {} items in total",
        report.committed
    );
    if !report.failed_ids.is_empty() {
        warn!(
            failed_ids = ?report.failed_ids,
            "{} items could not be fetched; rerun with an explicit start id to retry them",
            report.failed_ids.len()
        );
    }
    if let Some((ids, items)) = report.incomplete {
        bail!(SyncError::ShutdownIncomplete { ids, items });
    }
    Ok(())
}
