use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;

use crate::time::TimePoint;

/// Source of "now" for expiry evaluation and `startTime` stamping.
pub trait Clock: Send + Sync {
    fn now(&self) -> TimePoint;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> TimePoint {
        TimePoint::from(Utc::now())
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<TimePoint>,
}

impl ManualClock {
    pub fn new(start: TimePoint) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Start at the given epoch milliseconds, or the epoch itself if out of range.
    pub fn at_millis(millis: i64) -> Self {
        Self::new(TimePoint::from_millis(millis).unwrap_or_else(|| TimePoint::from(chrono::DateTime::UNIX_EPOCH)))
    }

    pub fn set(&self, to: TimePoint) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }

    /// Move forward by `by`. Stays put if the sum would overflow.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(next) = now.checked_add(by) {
            *now = next;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> TimePoint {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_tracks_wall_time() {
        let before = Utc::now().timestamp_millis();
        let now = SystemClock.now().as_millis();
        let after = Utc::now().timestamp_millis();
        assert!(before <= now && now <= after);
    }

    #[test]
    fn manual_clock_advances_and_sets() {
        let clock = ManualClock::at_millis(1_000);
        assert_eq!(clock.now().as_millis(), 1_000);

        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now().as_millis(), 1_250);

        clock.set(TimePoint::from_millis(10).unwrap());
        assert_eq!(clock.now().as_millis(), 10);
    }
}
