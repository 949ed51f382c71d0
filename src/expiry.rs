//! Per-field expiry: the policy model and the validity check.
//!
//! A field is either a bare JSON value or a value wrapped with an
//! [`ExpiryPolicy`]. A wrapped value expires at the earlier of its absolute
//! `expires` instant and `startTime + maxAge`. A policy that sets neither
//! never expires.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::RecordError;
use crate::time::{TimeDescription, TimePoint, resolve_time_point};

/// When a stored value stops being valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpiryPolicy {
    /// Absolute expiry instant.
    #[serde(
        rename = "expires",
        alias = "expiresAt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<TimeDescription>,

    /// Lifetime counted from `start_time`.
    #[serde(
        rename = "maxAge",
        default,
        skip_serializing_if = "Option::is_none",
        with = "millis"
    )]
    pub max_age: Option<Duration>,

    /// Anchor for `max_age`. Stamped on first write when left unset.
    #[serde(rename = "startTime", default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<TimeDescription>,
}

impl ExpiryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expires_at(mut self, at: impl Into<TimeDescription>) -> Self {
        self.expires_at = Some(snap_instant(at.into()));
        self
    }

    /// Lifetime, rounded up to whole milliseconds.
    pub fn max_age(mut self, age: Duration) -> Self {
        self.max_age = Some(ceil_millis(age));
        self
    }

    pub fn started_at(mut self, at: impl Into<TimeDescription>) -> Self {
        self.start_time = Some(snap_instant(at.into()));
        self
    }

    /// Bring every member to the precision the snapshot stores, so the
    /// policy reads back exactly as written. Native instants become epoch
    /// milliseconds and `max_age` is rounded up to whole milliseconds.
    pub fn normalize(&mut self) {
        self.expires_at = self.expires_at.take().map(snap_instant);
        self.start_time = self.start_time.take().map(snap_instant);
        self.max_age = self.max_age.map(ceil_millis);
    }

    /// Neither `expires_at` nor `max_age` is set.
    pub fn is_empty(&self) -> bool {
        self.expires_at.is_none() && self.max_age.is_none()
    }

    /// Anchor `max_age` at `now` if it has no start time yet.
    ///
    /// Returns true if a start time was stamped.
    pub fn stamp_start(&mut self, now: TimePoint) -> bool {
        if self.max_age.is_some() && self.start_time.is_none() {
            self.start_time = Some(TimeDescription::Millis(now.as_millis()));
            return true;
        }
        false
    }

    /// The instant this policy expires, if it ever does.
    ///
    /// A `max_age` without a start time is not yet due and contributes
    /// nothing. A `start_time + max_age` past the representable range never
    /// expires.
    pub fn deadline(&self) -> Result<Option<TimePoint>, RecordError> {
        let absolute = self.expires_at.as_ref().map(resolve_time_point).transpose()?;

        let relative = match (&self.max_age, &self.start_time) {
            (Some(age), Some(start)) => resolve_time_point(start)?.checked_add(*age),
            _ => None,
        };

        Ok(match (absolute, relative) {
            (Some(a), Some(r)) => Some(a.min(r)),
            (a, r) => a.or(r),
        })
    }
}

fn snap_instant(at: TimeDescription) -> TimeDescription {
    match at {
        TimeDescription::Instant(dt) => TimeDescription::Millis(dt.timestamp_millis()),
        other => other,
    }
}

fn ceil_millis(age: Duration) -> Duration {
    let whole = Duration::from_millis(u64::try_from(age.as_millis()).unwrap_or(u64::MAX));
    if whole < age {
        whole.saturating_add(Duration::from_millis(1))
    } else {
        whole
    }
}

/// A stored value together with its expiry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpiringField {
    pub value: Value,
    #[serde(flatten)]
    pub policy: ExpiryPolicy,
}

/// One entry of a [`FieldRecord`](crate::record::FieldRecord).
///
/// Serializes untagged: a bare value as itself, an expiring value as
/// `{"value": .., "maxAge": .., "startTime": .., "expires": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StoredField {
    Bare(Value),
    Expiring(ExpiringField),
}

impl StoredField {
    pub fn bare(value: impl Into<Value>) -> Self {
        StoredField::Bare(value.into())
    }

    pub fn expiring(value: impl Into<Value>, policy: ExpiryPolicy) -> Self {
        StoredField::Expiring(ExpiringField {
            value: value.into(),
            policy,
        })
    }

    /// The wrapped value, ignoring any policy.
    pub fn value(&self) -> &Value {
        match self {
            StoredField::Bare(v) => v,
            StoredField::Expiring(f) => &f.value,
        }
    }

    pub fn policy(&self) -> Option<&ExpiryPolicy> {
        match self {
            StoredField::Bare(_) => None,
            StoredField::Expiring(f) => Some(&f.policy),
        }
    }

    pub fn is_expiring(&self) -> bool {
        matches!(self, StoredField::Expiring(_))
    }

    /// The stored JSON shape, as it appears in a snapshot.
    pub fn to_json(&self) -> Value {
        match self {
            StoredField::Bare(v) => v.clone(),
            StoredField::Expiring(f) => serde_json::to_value(f).unwrap_or_else(|_| f.value.clone()),
        }
    }

    /// The form this field takes after a save and reload with expiry
    /// enabled.
    ///
    /// A bare value shaped like an envelope is read as one, an envelope
    /// with an empty policy collapses to its bare value, and the policy is
    /// normalized.
    pub fn canonical(self) -> Self {
        match self {
            StoredField::Bare(value) => match StoredField::from_json(value) {
                StoredField::Bare(value) => StoredField::Bare(value),
                expiring => expiring.canonical(),
            },
            StoredField::Expiring(f) if f.policy.is_empty() => StoredField::Bare(f.value),
            StoredField::Expiring(mut f) => {
                f.policy.normalize();
                StoredField::Expiring(f)
            }
        }
    }

    /// Classify a decoded snapshot member by shape.
    ///
    /// Members that look like an expiring envelope but fail to parse are
    /// kept as bare values.
    pub fn from_json(value: Value) -> Self {
        if !is_expiring_field(&value) {
            return StoredField::Bare(value);
        }
        match serde_json::from_value::<ExpiringField>(value.clone()) {
            Ok(field) => StoredField::Expiring(field),
            Err(e) => {
                warn!("expiry: malformed expiring envelope kept as bare value: {}", e);
                StoredField::Bare(value)
            }
        }
    }
}

impl From<Value> for StoredField {
    fn from(value: Value) -> Self {
        StoredField::Bare(value)
    }
}

impl From<ExpiringField> for StoredField {
    fn from(value: ExpiringField) -> Self {
        StoredField::Expiring(value)
    }
}

/// Structural test for an expiring envelope: an object with a `value`
/// member and at least one of `maxAge` / `expires` (or `expiresAt`).
pub fn is_expiring_field(candidate: &Value) -> bool {
    candidate.as_object().is_some_and(|obj| {
        obj.contains_key("value")
            && (obj.contains_key("maxAge")
                || obj.contains_key("expires")
                || obj.contains_key("expiresAt"))
    })
}

/// Outcome of [`evaluate`]. `value` is returned even when stale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Validity<'a> {
    pub valid: bool,
    pub value: &'a Value,
}

/// Decide whether `field` is still valid at `now`.
///
/// Pure: removing an expired field is the caller's job.
pub fn evaluate(field: &StoredField, now: TimePoint) -> Result<Validity<'_>, RecordError> {
    match field {
        StoredField::Bare(value) => Ok(Validity { valid: true, value }),
        StoredField::Expiring(f) => {
            let valid = match f.policy.deadline()? {
                Some(deadline) => now < deadline,
                None => true,
            };
            Ok(Validity {
                valid,
                value: &f.value,
            })
        }
    }
}

/// `maxAge` on the wire: milliseconds as a JSON number.
mod millis {
    use std::time::Duration;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        match Option::<f64>::deserialize(deserializer)? {
            None => Ok(None),
            Some(ms) if ms.is_finite() && ms >= 0.0 => Ok(Some(Duration::from_millis(ms.ceil() as u64))),
            Some(ms) => Err(D::Error::custom(format!("maxAge must be non-negative milliseconds, got {}", ms))),
        }
    }
}
