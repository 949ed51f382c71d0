use std::path::Path;
use std::sync::Arc;

use ::redb::{
    CommitError, Database, DatabaseError, ReadableTable, StorageError, TableDefinition, TableError,
    TransactionError,
};

use crate::backend::StorageBackend;
use crate::error::RecordError;

/// One row per record key, holding its encoded snapshot.
const SNAPSHOTS: TableDefinition<&str, &str> = TableDefinition::new("records");

macro_rules! storage_error_from {
    ($($err:ty),* $(,)?) => {
        $(
            impl From<$err> for RecordError {
                fn from(e: $err) -> Self {
                    RecordError::Storage(e.to_string())
                }
            }
        )*
    };
}

storage_error_from!(DatabaseError, TransactionError, TableError, StorageError, CommitError);

/// Snapshot storage in an embedded redb file.
///
/// Every `set` commits its own write transaction, so a saved snapshot is
/// durable once the call returns.
pub struct RedbBackend {
    db: Arc<Database>,
}

impl RedbBackend {
    /// Open the database at `path`, creating the file and table if needed.
    pub fn open(path: &Path) -> Result<Self, RecordError> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        {
            let _table = txn.open_table(SNAPSHOTS)?;
        }
        txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Keys of every record stored in this database.
    pub fn keys(&self) -> Result<Vec<String>, RecordError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SNAPSHOTS)?;
        let keys = table
            .iter()?
            .map(|row| -> Result<String, RecordError> { Ok(row?.0.value().to_string()) })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }
}

impl StorageBackend for RedbBackend {
    fn get(&self, key: &str) -> Result<Option<String>, RecordError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SNAPSHOTS)?;
        let snapshot = table.get(key)?.map(|guard| guard.value().to_string());
        Ok(snapshot)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), RecordError> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SNAPSHOTS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }
}
