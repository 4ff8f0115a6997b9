use redb::{Database, ReadableTable, TableDefinition};

const IDEMPOTENCY_TABLE: TableDefinition<&str, i64> = TableDefinition::new("idempotency_keys");

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redb error: {0}")]
    Redb(#[from] redb::Error),
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Data integrity error: {0}")]
    Integrity(String),
}

pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = Database::create(path)?;
        info!("📦 Redb Database opened");
        Ok(Self { db: Arc::new(db) })
    }

    pub fn begin_write(&self) -> Result<redb::WriteTransaction<'_>, StoreError> {
        Ok(self.db.begin_write()?)
    }

    pub fn begin_read(&self) -> Result<redb::ReadTransaction<'_>, StoreError> {
        Ok(self.db.begin_read()?)
    }

    /// Returns true if it is safe to process `key` (no live entry).
    /// This function only CHECKS; the caller writes the key via
    /// `set_idempotency` once the side effect is in flight.
    pub fn check_idempotency(&self, key: &str) -> Result<bool, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(IDEMPOTENCY_TABLE) {
            Ok(t) => t,
            // Table not created yet means no keys recorded.
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(true),
            Err(e) => return Err(e.into()),
        };

        Ok(table.get(key)?.is_none())
    }

    /// Record a live key, stamped with the time it was set for operator
    /// forensics. The key never lapses on its own: only a confirmed
    /// outcome (or an operator reset) clears it.
    pub fn set_idempotency(&self, key: &str, now_ms: i64) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(IDEMPOTENCY_TABLE)?;
            table.insert(key, now_ms)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Clear an idempotency key once the side effect's outcome is known:
    /// a persisted fill, a confirmed rejection, or an operator's
    /// reconciliation against the broker.
    pub fn clear_idempotency(&self, key: &str) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(IDEMPOTENCY_TABLE)?;
            table.remove(key)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}
