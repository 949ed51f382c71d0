use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::backend::StorageBackend;
use crate::error::RecordError;

/// In-process backend with an optional byte quota.
///
/// Usage is counted as the sum of key and value lengths, the way browser
/// storage accounts for its quota. A write that would push usage past the
/// quota fails with `QuotaExceeded` and leaves the previous value intact.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, String>>,
    quota_bytes: Option<usize>,
    writes: AtomicU64,
}

impl MemoryBackend {
    /// Create an unbounded, empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty backend that rejects writes beyond `quota_bytes`.
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            quota_bytes: Some(quota_bytes),
            ..Self::default()
        }
    }

    /// Seed an entry without counting it as a write or checking the quota.
    pub fn insert_raw(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.into(), value.into());
    }

    /// Number of successful `set` calls so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Bytes currently used (keys plus values).
    pub fn usage_bytes(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.iter().map(|(k, v)| k.len() + v.len()).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, RecordError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| RecordError::Storage(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), RecordError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| RecordError::Storage(e.to_string()))?;

        if let Some(quota) = self.quota_bytes {
            let used: usize = entries.iter().map(|(k, v)| k.len() + v.len()).sum();
            let replaced = entries.get(key).map_or(0, |old| key.len() + old.len());
            let needed = used - replaced + key.len() + value.len();
            if needed > quota {
                return Err(RecordError::QuotaExceeded {
                    key: key.to_string(),
                    message: format!("{} bytes needed, quota is {}", needed, quota),
                });
            }
        }

        entries.insert(key.to_string(), value.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
