use reqwest::StatusCode;
use thiserror::Error;

/// A single request against the remote API failed.
#[derive(Debug, Error)]
pub(crate) enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(StatusCode),
    #[error("malformed item body: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("malformed max item id {body:?}")]
    MalformedMaxItem { body: String },
}

#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("could not open database: {0}")]
    Connection(#[from] diesel::ConnectionError),
    #[error("query failed: {0}")]
    Query(#[from] diesel::result::Error),
    #[error("migration failed: {0}")]
    Migration(String),
}

/// Failure taxonomy of a synchronization run.
///
/// Only `RemoteBound` and `LocalScan` end a run early. The other variants are recovered
/// inside the pipeline and exist so that recovery is logged with a uniform shape.
#[derive(Debug, Error)]
pub(crate) enum SyncError {
    #[error("failed to resolve remote high water mark: {0}")]
    RemoteBound(#[source] FetchError),
    #[error("failed to fetch item {id}: {source}")]
    TransientFetch {
        id: i64,
        #[source]
        source: FetchError,
    },
    #[error("failed to commit {count} items: {source}")]
    PersistenceWrite {
        count: usize,
        #[source]
        source: StoreError,
    },
    #[error("failed to scan local item ids: {0}")]
    LocalScan(#[source] StoreError),
    #[error("shutdown incomplete: {ids} ids and {items} items still outstanding")]
    ShutdownIncomplete { ids: usize, items: usize },
    #[error("pipeline task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
