use std::collections::BTreeMap;
use std::collections::btree_map;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::RecordError;
use crate::expiry::StoredField;

/// In-memory field map behind an observable record.
///
/// Ordered by field name so snapshots encode deterministically.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FieldRecord {
    fields: BTreeMap<String, StoredField>,
}

impl FieldRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&StoredField> {
        self.fields.get(name)
    }

    /// Insert or replace a field, returning the previous entry.
    pub fn insert(&mut self, name: impl Into<String>, field: StoredField) -> Option<StoredField> {
        self.fields.insert(name.into(), field)
    }

    pub fn remove(&mut self, name: &str) -> Option<StoredField> {
        self.fields.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, StoredField> {
        self.fields.iter()
    }

    /// Serialize the whole record to its snapshot string.
    pub fn encode(&self) -> Result<String, RecordError> {
        serde_json::to_string(self).map_err(|e| RecordError::Serialization(e.to_string()))
    }

    /// Parse a snapshot string.
    ///
    /// With `classify_expiring` unset every member is kept bare, so records
    /// that never use expiry round-trip values of any shape untouched.
    pub fn decode(snapshot: &str, classify_expiring: bool) -> Result<Self, RecordError> {
        let members: Map<String, Value> =
            serde_json::from_str(snapshot).map_err(|e| RecordError::Serialization(e.to_string()))?;

        let fields = members
            .into_iter()
            .map(|(name, value)| {
                let field = if classify_expiring {
                    StoredField::from_json(value).canonical()
                } else {
                    StoredField::Bare(value)
                };
                (name, field)
            })
            .collect();

        Ok(Self { fields })
    }

    /// Build the initial record from whatever the backend holds.
    ///
    /// A missing, empty or corrupt snapshot yields an empty record.
    pub fn load(snapshot: Option<&str>, classify_expiring: bool) -> Self {
        let Some(text) = snapshot.filter(|s| !s.trim().is_empty()) else {
            debug!("record: no prior snapshot, starting empty");
            return Self::new();
        };

        match Self::decode(text, classify_expiring) {
            Ok(record) => {
                debug!("record: loaded snapshot with {} fields", record.len());
                record
            }
            Err(e) => {
                warn!("record: discarding unreadable snapshot: {}", e);
                Self::new()
            }
        }
    }
}

impl FromIterator<(String, StoredField)> for FieldRecord {
    fn from_iter<I: IntoIterator<Item = (String, StoredField)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a FieldRecord {
    type Item = (&'a String, &'a StoredField);
    type IntoIter = btree_map::Iter<'a, String, StoredField>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}
