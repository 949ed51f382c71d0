use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::expiry::StoredField;
use crate::record::FieldRecord;

/// Veto hook run before a write or delete: `(field, new, old, record)`.
/// Returning true rejects the mutation. `new` is None for a delete.
pub type BeforeChangeHook =
    Arc<dyn Fn(&str, Option<&StoredField>, Option<&StoredField>, &FieldRecord) -> bool + Send + Sync>;

/// Notification after a write or delete: `(field, new, old, record)`.
pub type ChangedHook =
    Arc<dyn Fn(&str, Option<&StoredField>, Option<&StoredField>, &FieldRecord) + Send + Sync>;

/// Veto hook run before a save: `(record, is_manual)`. Returning true skips it.
pub type BeforeSaveHook = Arc<dyn Fn(&FieldRecord, bool) -> bool + Send + Sync>;

/// Notification after a snapshot reached the backend.
pub type SavedHook = Arc<dyn Fn(&FieldRecord) + Send + Sync>;

/// Construction-time configuration of an observable record.
///
/// Hooks run while the record is locked. They receive the record by
/// reference and must not call back into the `ObservableRecord` itself.
#[derive(Clone)]
pub struct RecordOptions {
    /// Store and return values as-is, with no expiry evaluation or stamping.
    pub disable_expiry: bool,

    /// Debounce window. `None` disables the debounce path; zero saves on
    /// the next runtime tick.
    pub save_delay: Option<Duration>,

    /// Mutations to accumulate before a synchronous save. 0 is treated as 1.
    /// Unset means 1 without a save delay, and never with one.
    pub change_threshold: Option<usize>,

    pub clock: Arc<dyn Clock>,

    pub before_change: Option<BeforeChangeHook>,
    pub changed: Option<ChangedHook>,
    pub before_save: Option<BeforeSaveHook>,
    pub saved: Option<SavedHook>,
}

impl Default for RecordOptions {
    fn default() -> Self {
        Self {
            disable_expiry: false,
            save_delay: None,
            change_threshold: None,
            clock: Arc::new(SystemClock),
            before_change: None,
            changed: None,
            before_save: None,
            saved: None,
        }
    }
}

impl RecordOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_expiry_disabled(mut self) -> Self {
        self.disable_expiry = true;
        self
    }

    pub fn with_save_delay(mut self, delay: Duration) -> Self {
        self.save_delay = Some(delay);
        self
    }

    pub fn with_change_threshold(mut self, threshold: usize) -> Self {
        self.change_threshold = Some(threshold.max(1));
        self
    }

    /// Never save automatically; only an explicit save reaches the backend.
    pub fn with_manual_saves_only(mut self) -> Self {
        self.change_threshold = Some(usize::MAX);
        self.save_delay = None;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The threshold the scheduler actually counts to.
    pub(crate) fn effective_threshold(&self) -> usize {
        match (self.change_threshold, self.save_delay) {
            (Some(n), _) => n.max(1),
            (None, Some(_)) => usize::MAX,
            (None, None) => 1,
        }
    }

    pub fn before_change<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, Option<&StoredField>, Option<&StoredField>, &FieldRecord) -> bool + Send + Sync + 'static,
    {
        self.before_change = Some(Arc::new(hook));
        self
    }

    pub fn on_changed<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, Option<&StoredField>, Option<&StoredField>, &FieldRecord) + Send + Sync + 'static,
    {
        self.changed = Some(Arc::new(hook));
        self
    }

    pub fn before_save<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FieldRecord, bool) -> bool + Send + Sync + 'static,
    {
        self.before_save = Some(Arc::new(hook));
        self
    }

    pub fn on_saved<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FieldRecord) + Send + Sync + 'static,
    {
        self.saved = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for RecordOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordOptions")
            .field("disable_expiry", &self.disable_expiry)
            .field("save_delay", &self.save_delay)
            .field("change_threshold", &self.change_threshold)
            .field("before_change", &self.before_change.is_some())
            .field("changed", &self.changed.is_some())
            .field("before_save", &self.before_save.is_some())
            .field("saved", &self.saved.is_some())
            .finish()
    }
}
