use std::sync::Arc;

use crate::backend::StorageBackend;
use crate::error::RecordError;
use crate::observable::{ObservableRecord, SaveOutcome};
use crate::options::RecordOptions;

/// An observable record plus an explicit save entry point.
///
/// Pair with [`RecordOptions::with_manual_saves_only`] to take persistence
/// fully into the caller's hands.
#[derive(Clone)]
pub struct RecordController {
    record: ObservableRecord,
}

impl RecordController {
    pub fn open(
        key: impl Into<String>,
        backend: Arc<dyn StorageBackend>,
        options: RecordOptions,
    ) -> Result<Self, RecordError> {
        Ok(Self {
            record: ObservableRecord::open(key, backend, options)?,
        })
    }

    pub fn record(&self) -> &ObservableRecord {
        &self.record
    }

    /// Persist the current fields now.
    ///
    /// Returns false when `before_save` vetoed the save. Counting and any
    /// pending debounced save are left alone.
    pub fn save(&self) -> Result<bool, RecordError> {
        Ok(self.record.save_now()? == SaveOutcome::Saved)
    }

    pub fn into_record(self) -> ObservableRecord {
        self.record
    }
}

impl From<ObservableRecord> for RecordController {
    fn from(record: ObservableRecord) -> Self {
        Self { record }
    }
}

/// Open an observable record stored under `key`.
pub fn create_record(
    key: impl Into<String>,
    backend: Arc<dyn StorageBackend>,
    options: RecordOptions,
) -> Result<ObservableRecord, RecordError> {
    ObservableRecord::open(key, backend, options)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use serde_json::json;

    use super::*;
    use crate::backend::MemoryBackend;

    #[test]
    fn save_with_no_mutations_persists_loaded_state() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert_raw("prefs", r#"{"a":1}"#);
        let controller = RecordController::open("prefs", backend.clone(), RecordOptions::default()).unwrap();

        assert!(controller.save().unwrap());
        assert_eq!(backend.write_count(), 1);
        assert_eq!(backend.get("prefs").unwrap().as_deref(), Some(r#"{"a":1}"#));
    }

    #[test]
    fn manual_only_record_waits_for_save() {
        let backend = Arc::new(MemoryBackend::new());
        let controller = RecordController::open(
            "prefs",
            backend.clone(),
            RecordOptions::new().with_manual_saves_only(),
        )
        .unwrap();

        for i in 0..10 {
            controller.record().set(&format!("f{}", i), json!(i)).unwrap();
        }
        assert_eq!(backend.write_count(), 0);
        assert_eq!(controller.record().pending_changes(), 10);

        assert!(controller.save().unwrap());
        assert_eq!(backend.write_count(), 1);
        // Manual saves do not reset the automatic count.
        assert_eq!(controller.record().pending_changes(), 10);
    }

    #[test]
    fn vetoed_save_returns_false() {
        let manual_seen = Arc::new(AtomicBool::new(false));
        let seen = manual_seen.clone();
        let backend = Arc::new(MemoryBackend::new());
        let controller = RecordController::open(
            "prefs",
            backend.clone(),
            RecordOptions::new().before_save(move |_, manual| {
                seen.store(manual, Ordering::SeqCst);
                true
            }),
        )
        .unwrap();

        assert!(!controller.save().unwrap());
        assert!(manual_seen.load(Ordering::SeqCst));
        assert_eq!(backend.write_count(), 0);
    }

    #[test]
    fn save_failure_propagates() {
        let backend = Arc::new(MemoryBackend::with_quota(4));
        let controller = RecordController::open("prefs", backend, RecordOptions::new().with_manual_saves_only()).unwrap();
        controller.record().set("a", json!(1)).unwrap();

        assert!(controller.save().unwrap_err().is_quota_exceeded());
    }

    #[test]
    fn create_record_opens_observable() {
        let backend = Arc::new(MemoryBackend::new());
        let record = create_record("k", backend.clone(), RecordOptions::default()).unwrap();
        record.set("x", json!("y")).unwrap();

        let controller = RecordController::from(record.clone());
        assert_eq!(controller.record().get("x").unwrap(), Some(json!("y")));
        assert_eq!(controller.into_record().key(), "k");
    }
}
