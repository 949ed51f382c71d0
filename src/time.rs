//! Time points and the flexible descriptions they are resolved from.
//!
//! An expiry boundary may be written as epoch milliseconds, a date string,
//! a calendar description, or a native instant. All four resolve to a
//! [`TimePoint`] before any comparison happens.

use std::fmt;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::RecordError;

/// Naive date-time layouts read in local time.
const LOCAL_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// A resolved, totally ordered instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimePoint(DateTime<Utc>);

impl TimePoint {
    /// Build from epoch milliseconds. Returns `None` outside chrono's range.
    pub fn from_millis(millis: i64) -> Option<Self> {
        DateTime::from_timestamp_millis(millis).map(Self)
    }

    pub fn as_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// `self + duration`, or `None` if the sum leaves the representable range.
    pub fn checked_add(&self, duration: Duration) -> Option<Self> {
        let delta = TimeDelta::from_std(duration).ok()?;
        self.0.checked_add_signed(delta).map(Self)
    }
}

impl From<DateTime<Utc>> for TimePoint {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value)
    }
}

impl From<SystemTime> for TimePoint {
    fn from(value: SystemTime) -> Self {
        Self(DateTime::<Utc>::from(value))
    }
}

impl fmt::Display for TimePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

/// Calendar-style description of a local time.
///
/// Every field is optional. `year` defaults to 0, `month` and `day` to 1,
/// the rest to 0. `month` is 1-based.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarDescription {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hour: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minute: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub second: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub millisecond: Option<u32>,
}

impl CalendarDescription {
    /// Midnight (local) of the given date.
    pub fn ymd(year: i32, month: u32, day: u32) -> Self {
        Self {
            year: Some(year),
            month: Some(month),
            day: Some(day),
            ..Default::default()
        }
    }

    pub fn with_time(mut self, hour: u32, minute: u32, second: u32) -> Self {
        self.hour = Some(hour);
        self.minute = Some(minute);
        self.second = Some(second);
        self
    }
}

/// Any of the accepted ways to describe an instant.
///
/// Serializes back to the form it was read from, except `Instant`, which
/// is written as epoch milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeDescription {
    Millis(i64),
    Text(String),
    Calendar(CalendarDescription),
    Instant(DateTime<Utc>),
}

impl From<i64> for TimeDescription {
    fn from(value: i64) -> Self {
        TimeDescription::Millis(value)
    }
}

impl From<&str> for TimeDescription {
    fn from(value: &str) -> Self {
        TimeDescription::Text(value.to_string())
    }
}

impl From<String> for TimeDescription {
    fn from(value: String) -> Self {
        TimeDescription::Text(value)
    }
}

impl From<CalendarDescription> for TimeDescription {
    fn from(value: CalendarDescription) -> Self {
        TimeDescription::Calendar(value)
    }
}

impl From<DateTime<Utc>> for TimeDescription {
    fn from(value: DateTime<Utc>) -> Self {
        TimeDescription::Instant(value)
    }
}

impl From<TimePoint> for TimeDescription {
    fn from(value: TimePoint) -> Self {
        TimeDescription::Instant(value.0)
    }
}

impl From<SystemTime> for TimeDescription {
    fn from(value: SystemTime) -> Self {
        TimeDescription::Instant(DateTime::<Utc>::from(value))
    }
}

impl Serialize for TimeDescription {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TimeDescription::Millis(ms) => serializer.serialize_i64(*ms),
            TimeDescription::Text(s) => serializer.serialize_str(s),
            TimeDescription::Calendar(c) => c.serialize(serializer),
            TimeDescription::Instant(dt) => serializer.serialize_i64(dt.timestamp_millis()),
        }
    }
}

impl<'de> Deserialize<'de> for TimeDescription {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Number(n) => {
                if let Some(ms) = n.as_i64() {
                    Ok(TimeDescription::Millis(ms))
                } else {
                    match n.as_f64() {
                        Some(f) if f.is_finite() => Ok(TimeDescription::Millis(f.trunc() as i64)),
                        _ => Err(D::Error::custom(format!("epoch milliseconds {} out of range", n))),
                    }
                }
            }
            Value::String(s) => Ok(TimeDescription::Text(s)),
            obj @ Value::Object(_) => serde_json::from_value(obj)
                .map(TimeDescription::Calendar)
                .map_err(D::Error::custom),
            other => Err(D::Error::custom(format!(
                "expected epoch milliseconds, date string or calendar object, got {}",
                other
            ))),
        }
    }
}

/// Resolve a description to a comparable instant.
///
/// Fails with `InvalidTimeDescription` when a string can't be parsed, a
/// calendar field is out of range, or a local time does not exist.
pub fn resolve_time_point(description: &TimeDescription) -> Result<TimePoint, RecordError> {
    match description {
        TimeDescription::Millis(ms) => TimePoint::from_millis(*ms).ok_or_else(|| {
            RecordError::InvalidTimeDescription(format!("epoch milliseconds {} out of range", ms))
        }),
        TimeDescription::Text(s) => parse_date_string(s),
        TimeDescription::Calendar(c) => resolve_calendar(c),
        TimeDescription::Instant(dt) => Ok(TimePoint(*dt)),
    }
}

fn parse_date_string(input: &str) -> Result<TimePoint, RecordError> {
    let s = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(TimePoint(dt.with_timezone(&Utc)));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Ok(TimePoint(dt.with_timezone(&Utc)));
    }
    for format in LOCAL_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return local_to_point(naive, input);
        }
    }
    // Date-only ISO strings are UTC midnight.
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(TimePoint(date.and_time(NaiveTime::MIN).and_utc()));
    }

    Err(RecordError::InvalidTimeDescription(format!(
        "cannot parse date string '{}'",
        input
    )))
}

fn resolve_calendar(c: &CalendarDescription) -> Result<TimePoint, RecordError> {
    let year = c.year.unwrap_or(0);
    let month = c.month.unwrap_or(1);
    let day = c.day.unwrap_or(1);

    let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
        RecordError::InvalidTimeDescription(format!(
            "no such date {:04}-{:02}-{:02}",
            year, month, day
        ))
    })?;
    let time = NaiveTime::from_hms_milli_opt(
        c.hour.unwrap_or(0),
        c.minute.unwrap_or(0),
        c.second.unwrap_or(0),
        c.millisecond.unwrap_or(0),
    )
    .ok_or_else(|| RecordError::InvalidTimeDescription(format!("time of day out of range in {:?}", c)))?;

    local_to_point(date.and_time(time), &format!("{:?}", c))
}

fn local_to_point(naive: NaiveDateTime, source: &str) -> Result<TimePoint, RecordError> {
    // DST fall-back repeats an hour; take the first occurrence.
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| TimePoint(dt.with_timezone(&Utc)))
        .ok_or_else(|| {
            RecordError::InvalidTimeDescription(format!("'{}' does not exist in local time", source))
        })
}
