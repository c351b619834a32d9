//! Wall-clock source used for TTL and job timing.

use std::sync::Mutex;
use std::time::Duration;

use time::{Date, OffsetDateTime};

use super::lock::mutex_lock;

const SOURCE: &str = "buffer::clock";

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// Real UTC wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Manually advanced clock for deterministic tests and replay tooling.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Start at the current wall time.
    pub fn starting_now() -> Self {
        Self::new(OffsetDateTime::now_utc())
    }

    pub fn advance(&self, by: Duration) {
        let mut now = mutex_lock(&self.now, SOURCE, "advance");
        *now += by;
    }

    pub fn set(&self, at: OffsetDateTime) {
        *mutex_lock(&self.now, SOURCE, "set") = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *mutex_lock(&self.now, SOURCE, "now")
    }
}

/// Elapsed time between two instants, saturating at zero.
pub(crate) fn elapsed_between(start: OffsetDateTime, end: OffsetDateTime) -> Duration {
    Duration::try_from(end - start).unwrap_or(Duration::ZERO)
}

/// `start + ttl`, saturating at the last representable date.
pub(crate) fn deadline(start: OffsetDateTime, ttl: Duration) -> OffsetDateTime {
    time::Duration::try_from(ttl)
        .ok()
        .and_then(|ttl| start.checked_add(ttl))
        .unwrap_or_else(|| Date::MAX.midnight().assume_utc())
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(datetime!(2024-01-01 0:00 UTC));
        clock.advance(Duration::from_millis(1_500));
        assert_eq!(clock.now(), datetime!(2024-01-01 0:00:01.5 UTC));
    }

    #[test]
    fn elapsed_saturates_backwards() {
        let later = datetime!(2024-01-01 0:01 UTC);
        let earlier = datetime!(2024-01-01 0:00 UTC);
        assert_eq!(elapsed_between(later, earlier), Duration::ZERO);
        assert_eq!(elapsed_between(earlier, later), Duration::from_secs(60));
    }

    #[test]
    fn deadline_saturates_instead_of_overflowing() {
        let start = datetime!(2024-01-01 0:00 UTC);
        assert_eq!(
            deadline(start, Duration::from_secs(90)),
            datetime!(2024-01-01 0:01:30 UTC)
        );

        let far = deadline(start, Duration::from_secs(u64::MAX / 2));
        assert_eq!(far, Date::MAX.midnight().assume_utc());
        assert!(far > start);
    }
}
