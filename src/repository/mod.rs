use diesel::{connection::SimpleConnection, prelude::*, SqliteConnection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::{error::StoreError, service::Item};

pub(crate) mod item; // Core
pub(crate) mod story;

pub(crate) const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub(crate) struct Repository {
    connection: SqliteConnection,
}

impl Repository {
    pub(crate) fn new(database_path: &str) -> Result<Self, StoreError> {
        let mut connection = SqliteConnection::establish(database_path)?;
        // The gap scanner reads through its own connection while the persister writes.
        connection.batch_execute("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")?;
        connection
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        return Ok(Self { connection });
    }
}

/// Local side of the mirror. Only the persister calls `save_items`.
pub(crate) trait ItemStore: Send + 'static {
    fn find_max_item_id(&mut self) -> Result<Option<i64>, StoreError>;

    /// Ascending ids in `[from, bound)`, at most `limit` of them.
    fn find_item_ids(&mut self, from: i64, bound: i64, limit: usize) -> Result<Vec<i64>, StoreError>;

    /// Upserts the whole batch in one transaction; on error nothing is durable.
    fn save_items(&mut self, items: &[Item]) -> Result<(), StoreError>;
}

impl ItemStore for Repository {
    fn find_max_item_id(&mut self) -> Result<Option<i64>, StoreError> {
        Repository::find_max_item_id(self)
    }

    fn find_item_ids(&mut self, from: i64, bound: i64, limit: usize) -> Result<Vec<i64>, StoreError> {
        Repository::find_item_ids(self, from, bound, limit)
    }

    fn save_items(&mut self, items: &[Item]) -> Result<(), StoreError> {
        Repository::save_items(self, items)
    }
}
