//! The observable record: field access with expiry on read, hooks around
//! every mutation, and scheduled persistence of the whole snapshot.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, error};

use crate::backend::StorageBackend;
use crate::error::RecordError;
use crate::expiry::{ExpiryPolicy, StoredField, evaluate};
use crate::options::RecordOptions;
use crate::record::FieldRecord;
use crate::scheduler::{ChangeScheduler, Trigger};

/// Result of a write or delete that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Applied,
    /// `before_change` rejected it; the record is untouched.
    Vetoed,
}

/// Result of a save attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// `before_save` skipped it; nothing was written.
    Vetoed,
}

/// A key/value record bound to one backend key.
///
/// Cloning is cheap and every clone observes the same fields. A pending
/// debounced save keeps the record alive until it fires, so dropping the
/// last handle does not lose buffered mutations.
#[derive(Clone)]
pub struct ObservableRecord {
    shared: Arc<Shared>,
}

struct Shared {
    key: String,
    backend: Arc<dyn StorageBackend>,
    options: RecordOptions,
    runtime: Option<Handle>,
    state: Mutex<State>,
}

struct State {
    fields: FieldRecord,
    scheduler: ChangeScheduler,
}

impl ObservableRecord {
    /// Load `key` from `backend` and wrap it.
    ///
    /// A missing or unreadable snapshot starts an empty record. A save delay
    /// requires a Tokio runtime with timers enabled on the calling thread.
    pub fn open(
        key: impl Into<String>,
        backend: Arc<dyn StorageBackend>,
        options: RecordOptions,
    ) -> Result<Self, RecordError> {
        let key = key.into();

        let runtime = match options.save_delay {
            Some(_) => Some(Handle::try_current().map_err(|e| {
                RecordError::Runtime(format!("save delay for '{}' needs a Tokio runtime: {}", key, e))
            })?),
            None => None,
        };

        let snapshot = backend.get(&key)?;
        let fields = FieldRecord::load(snapshot.as_deref(), !options.disable_expiry);
        debug!("record '{}': opened with {} fields", key, fields.len());

        let scheduler = ChangeScheduler::new(options.effective_threshold(), options.save_delay);

        Ok(Self {
            shared: Arc::new(Shared {
                key,
                backend,
                options,
                runtime,
                state: Mutex::new(State { fields, scheduler }),
            }),
        })
    }

    pub fn key(&self) -> &str {
        &self.shared.key
    }

    pub fn expiry_enabled(&self) -> bool {
        !self.shared.options.disable_expiry
    }

    // ====================================================================
    // Read
    // ====================================================================

    /// Read a field.
    ///
    /// With expiry enabled, an expired field is removed on the spot and
    /// reads as absent. That removal is silent: no hooks, no save. With
    /// expiry disabled the stored JSON is returned as-is.
    pub fn get(&self, field: &str) -> Result<Option<Value>, RecordError> {
        let mut state = self.shared.lock();

        let Some(stored) = state.fields.get(field) else {
            return Ok(None);
        };

        if self.shared.options.disable_expiry {
            return Ok(Some(stored.to_json()));
        }

        let now = self.shared.options.clock.now();
        let verdict = evaluate(stored, now)?;
        if verdict.valid {
            return Ok(Some(verdict.value.clone()));
        }

        state.fields.remove(field);
        debug!("record '{}': field '{}' expired", self.shared.key, field);
        Ok(None)
    }

    /// Read a field and deserialize it.
    pub fn get_as<T: DeserializeOwned>(&self, field: &str) -> Result<Option<T>, RecordError> {
        self.get(field)?
            .map(|v| serde_json::from_value(v).map_err(|e| RecordError::Serialization(e.to_string())))
            .transpose()
    }

    /// The stored entry, without evaluating expiry.
    pub fn raw(&self, field: &str) -> Option<StoredField> {
        self.shared.lock().fields.get(field).cloned()
    }

    /// Whether an entry is stored, expired or not.
    pub fn contains(&self, field: &str) -> bool {
        self.shared.lock().fields.contains(field)
    }

    pub fn fields(&self) -> Vec<String> {
        self.shared.lock().fields.names()
    }

    pub fn len(&self) -> usize {
        self.shared.lock().fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A copy of the current in-memory record.
    pub fn snapshot(&self) -> FieldRecord {
        self.shared.lock().fields.clone()
    }

    /// Mutations since the last automatic save.
    pub fn pending_changes(&self) -> usize {
        self.shared.lock().scheduler.change_count()
    }

    pub fn has_pending_save(&self) -> bool {
        self.shared.lock().scheduler.has_pending()
    }

    // ====================================================================
    // Write
    // ====================================================================

    /// Write a field.
    ///
    /// With expiry enabled, a bare value shaped like an expiring envelope
    /// is stored as one, exactly as a reload would read it.
    ///
    /// Errors come from a save this write triggered synchronously. The
    /// write itself is already applied in memory when that happens.
    pub fn set(&self, field: &str, value: impl Into<StoredField>) -> Result<Mutation, RecordError> {
        self.mutate(field, Some(value.into()))
    }

    /// Serialize `value` and write it as a bare field.
    pub fn set_value<T: Serialize + ?Sized>(&self, field: &str, value: &T) -> Result<Mutation, RecordError> {
        let json = serde_json::to_value(value).map_err(|e| RecordError::Serialization(e.to_string()))?;
        self.set(field, StoredField::Bare(json))
    }

    /// Write a field that expires according to `policy`.
    pub fn set_expiring(
        &self,
        field: &str,
        value: impl Into<Value>,
        policy: ExpiryPolicy,
    ) -> Result<Mutation, RecordError> {
        self.set(field, StoredField::expiring(value, policy))
    }

    /// Delete a field. Goes through the same hooks and scheduling as a write.
    pub fn remove(&self, field: &str) -> Result<Mutation, RecordError> {
        self.mutate(field, None)
    }

    fn mutate(&self, field: &str, new: Option<StoredField>) -> Result<Mutation, RecordError> {
        let shared = &self.shared;
        // Store what a reload would read back, so the value never changes
        // meaning across a save.
        let new = if shared.options.disable_expiry {
            new
        } else {
            new.map(StoredField::canonical)
        };

        let mut guard = shared.lock();
        let state = &mut *guard;

        let old = state.fields.get(field).cloned();

        if let Some(hook) = &shared.options.before_change {
            if hook(field, new.as_ref(), old.as_ref(), &state.fields) {
                debug!("record '{}': change to '{}' vetoed", shared.key, field);
                return Ok(Mutation::Vetoed);
            }
        }

        let new = new.map(|mut stored| {
            if !shared.options.disable_expiry {
                if let StoredField::Expiring(f) = &mut stored {
                    f.policy.stamp_start(shared.options.clock.now());
                }
            }
            stored
        });

        match &new {
            Some(stored) => {
                state.fields.insert(field, stored.clone());
            }
            None => {
                state.fields.remove(field);
            }
        }

        if let Some(hook) = &shared.options.changed {
            hook(field, new.as_ref(), old.as_ref(), &state.fields);
        }

        match state.scheduler.record_change() {
            Trigger::SaveNow => {
                shared.persist(state, false)?;
            }
            Trigger::Debounce { delay, generation } => {
                Shared::arm_debounce(shared, state, delay, generation);
            }
            Trigger::Hold => {}
        }

        Ok(Mutation::Applied)
    }

    /// Write the current record now, bypassing counting and debounce.
    ///
    /// Leaves the automatic path untouched: the change count is not reset
    /// and a pending debounced save stays armed.
    pub(crate) fn save_now(&self) -> Result<SaveOutcome, RecordError> {
        let mut guard = self.shared.lock();
        self.shared.persist(&mut guard, true)
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, state: &mut State, manual: bool) -> Result<SaveOutcome, RecordError> {
        if let Some(hook) = &self.options.before_save {
            if hook(&state.fields, manual) {
                debug!("record '{}': save vetoed (manual={})", self.key, manual);
                return Ok(SaveOutcome::Vetoed);
            }
        }

        let snapshot = state.fields.encode()?;
        self.backend.set(&self.key, &snapshot)?;
        if !manual {
            state.scheduler.mark_saved();
        }
        debug!(
            "record '{}': saved {} fields ({} bytes, manual={})",
            self.key,
            state.fields.len(),
            snapshot.len(),
            manual
        );

        if let Some(hook) = &self.options.saved {
            hook(&state.fields);
        }
        Ok(SaveOutcome::Saved)
    }

    fn arm_debounce(shared: &Arc<Shared>, state: &mut State, delay: Duration, generation: u64) {
        let Some(runtime) = &shared.runtime else {
            return;
        };

        let task_shared = Arc::clone(shared);
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            // The backend write is synchronous and may touch disk.
            let key = task_shared.key.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || task_shared.fire_debounced(generation)).await {
                error!("record '{}': debounced save task failed: {}", key, e);
            }
        });
        state.scheduler.arm(generation, handle);
        debug!("record '{}': save scheduled in {:?}", shared.key, delay);
    }

    fn fire_debounced(&self, generation: u64) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if !state.scheduler.claim(generation) {
            debug!("record '{}': superseded save timer ignored", self.key);
            return;
        }
        // Nobody awaits this save; the log is where its failure surfaces.
        if let Err(e) = self.persist(state, false) {
            error!("record '{}': debounced save failed: {}", self.key, e);
        }
    }
}
