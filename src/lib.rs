//! Reactive key/value records with per-field expiry, persisted as a single
//! JSON snapshot to a pluggable backend.
//!
//! ```ignore
//! let backend = Arc::new(MemoryBackend::new());
//! let record = create_record("session", backend, RecordOptions::new().with_change_threshold(3))?;
//! record.set_expiring("token", "abc", ExpiryPolicy::new().max_age(Duration::from_secs(60)))?;
//! assert_eq!(record.get("token")?, Some(json!("abc")));
//! ```

pub mod backend;
pub mod clock;
pub mod controller;
pub mod error;
pub mod expiry;
pub mod observable;
pub mod options;
pub mod record;
mod scheduler;
pub mod time;

pub use backend::{MemoryBackend, RedbBackend, StorageBackend};
pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::{RecordController, create_record};
pub use error::RecordError;
pub use expiry::{ExpiringField, ExpiryPolicy, StoredField, Validity, evaluate, is_expiring_field};
pub use observable::{Mutation, ObservableRecord, SaveOutcome};
pub use options::{BeforeChangeHook, BeforeSaveHook, ChangedHook, RecordOptions, SavedHook};
pub use record::FieldRecord;
pub use time::{CalendarDescription, TimeDescription, TimePoint, resolve_time_point};
