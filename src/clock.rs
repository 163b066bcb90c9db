//! Clock abstraction
//!
//! All scheduling math runs on monotonic seconds measured from the clock's
//! origin. Wall time is only used for last-seen bookkeeping and the local date
//! feeds the daily tie-break seed.

use chrono::{Local, NaiveDate};
use std::sync::Mutex;
use std::time::Instant;

/// Source of time for the scheduler
pub trait Clock: Send + Sync {
    /// Monotonic seconds since the clock was created
    fn monotonic(&self) -> f64;

    /// Wall clock seconds since the Unix epoch
    fn wall(&self) -> f64;

    /// Current local calendar date
    fn local_date(&self) -> NaiveDate;
}

/// Real clock backed by `Instant` and the local timezone
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn monotonic(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn wall(&self) -> f64 {
        Local::now().timestamp_millis() as f64 / 1000.0
    }

    fn local_date(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

#[derive(Debug)]
struct FakeTime {
    monotonic: f64,
    wall: f64,
    date: NaiveDate,
}

/// Manually advanced clock for tests and simulations
#[derive(Debug)]
pub struct FakeClock {
    inner: Mutex<FakeTime>,
}

impl FakeClock {
    /// Create a fake clock at monotonic `start` on the given date
    pub fn new(start: f64, date: NaiveDate) -> Self {
        Self {
            inner: Mutex::new(FakeTime {
                monotonic: start,
                wall: 1_700_000_000.0 + start,
                date,
            }),
        }
    }

    /// Advance monotonic and wall time together
    pub fn advance(&self, delta: f64) {
        let mut t = self.lock();
        t.monotonic += delta;
        t.wall += delta;
    }

    /// Jump the wall clock without moving monotonic time
    pub fn set_wall(&self, wall: f64) {
        self.lock().wall = wall;
    }

    pub fn set_date(&self, date: NaiveDate) {
        self.lock().date = date;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeTime> {
        // A poisoned fake clock only happens after a panicking test
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Clock for FakeClock {
    fn monotonic(&self) -> f64 {
        self.lock().monotonic
    }

    fn wall(&self) -> f64 {
        self.lock().wall
    }

    fn local_date(&self) -> NaiveDate {
        self.lock().date
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, 10).unwrap()
    }

    #[test]
    fn test_fake_clock_advance() {
        let clock = FakeClock::new(100.0, date());
        assert_eq!(clock.monotonic(), 100.0);
        clock.advance(2.5);
        assert_eq!(clock.monotonic(), 102.5);
    }

    #[test]
    fn test_fake_clock_wall_moves_with_monotonic() {
        let clock = FakeClock::new(0.0, date());
        let wall = clock.wall();
        clock.advance(10.0);
        assert_eq!(clock.wall(), wall + 10.0);
    }

    #[test]
    fn test_fake_clock_set_date() {
        let clock = FakeClock::new(0.0, date());
        let next = NaiveDate::from_ymd_opt(2025, 10, 11).unwrap();
        clock.set_date(next);
        assert_eq!(clock.local_date(), next);
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.monotonic();
        let b = clock.monotonic();
        assert!(b >= a);
        assert!(clock.wall() > 1_577_836_800.0);
    }
}
