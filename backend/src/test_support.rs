//! Test doubles shared by unit tests (in `src/`) and integration tests (in
//! `tests/`). Compiled for tests and behind the `test-support` feature.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Local, TimeDelta, TimeZone, Utc};
use mockable::Clock;

/// Clock whose current time is set by the test.
///
/// ```
/// use std::time::Duration;
/// use mockable::Clock;
/// use perms_store::test_support::MutableClock;
///
/// let clock = MutableClock::at_epoch_offset(0);
/// let before = clock.utc();
/// clock.advance(Duration::from_secs(30));
/// assert_eq!((clock.utc() - before).num_seconds(), 30);
/// ```
#[derive(Debug)]
pub struct MutableClock(Mutex<DateTime<Utc>>);

impl MutableClock {
    /// Clock frozen at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    /// Clock frozen `seconds` after 2024-01-01T00:00:00Z.
    pub fn at_epoch_offset(seconds: i64) -> Self {
        let base = match Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single() {
            Some(base) => base,
            None => panic!("fixed base timestamp is valid"),
        };
        Self::new(base + TimeDelta::seconds(seconds))
    }

    /// Move the clock to `now`.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.lock_clock() = now;
    }

    /// Move the clock forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        let delta = match TimeDelta::from_std(delta) {
            Ok(delta) => delta,
            Err(error) => {
                panic!("failed to convert Duration to TimeDelta: {error}; delta={delta:?}")
            }
        };
        *self.lock_clock() += delta;
    }

    fn lock_clock(&self) -> MutexGuard<'_, DateTime<Utc>> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(_) => panic!("clock mutex"),
        }
    }
}

impl Clock for MutableClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.lock_clock()
    }
}
