//! Storage backends a record persists its snapshot to.

pub mod memory;
pub mod redb;

use std::sync::Arc;

use crate::error::RecordError;

pub use self::memory::MemoryBackend;
pub use self::redb::RedbBackend;

/// Synchronous string storage keyed by record name.
///
/// A record reads its key once when it is opened, and writes the whole
/// encoded snapshot back on every save. `set` fails with
/// `RecordError::QuotaExceeded` when the backend refuses the write for
/// capacity or permission reasons.
pub trait StorageBackend: Send + Sync {
    /// Get the snapshot stored under `key`. Returns None if there is none.
    fn get(&self, key: &str) -> Result<Option<String>, RecordError>;

    /// Store `value` under `key`, replacing any previous snapshot.
    fn set(&self, key: &str, value: &str) -> Result<(), RecordError>;
}

impl<T: StorageBackend + ?Sized> StorageBackend for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>, RecordError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), RecordError> {
        (**self).set(key, value)
    }
}
