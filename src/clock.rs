//! Wall-clock abstraction shared by every TTL-aware component.
//!
//! Expiry, liveness timestamps, and garbage-collection ages all read time
//! through [`Clock`] so tests can drive them deterministically with
//! [`MockClock`].

use std::{
    sync::{PoisonError, RwLock},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    /// Return the current time.
    fn now(&self) -> SystemTime;

    /// Return the current time as whole seconds since the Unix epoch.
    ///
    /// Times before the epoch collapse to zero.
    fn unix_secs(&self) -> u64 {
        self.now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs())
    }
}

/// [`Clock`] backed by [`SystemTime::now`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime { SystemTime::now() }
}

/// Manually advanced [`Clock`] for tests and simulations.
///
/// # Examples
///
/// ```
/// use std::time::{Duration, UNIX_EPOCH};
///
/// use ingestor::clock::{Clock, MockClock};
///
/// let clock = MockClock::with_time(UNIX_EPOCH + Duration::from_secs(10));
/// clock.advance(Duration::from_secs(5));
/// assert_eq!(clock.unix_secs(), 15);
/// ```
#[derive(Debug)]
pub struct MockClock {
    now: RwLock<SystemTime>,
}

impl MockClock {
    /// Create a clock frozen at `time`.
    #[must_use]
    pub fn with_time(time: SystemTime) -> Self {
        Self {
            now: RwLock::new(time),
        }
    }

    /// Create a clock frozen at the current system time.
    #[must_use]
    pub fn new() -> Self { Self::with_time(SystemTime::now()) }

    /// Move the clock forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.write().unwrap_or_else(PoisonError::into_inner);
        *now += duration;
    }

    /// Jump the clock to `time`.
    pub fn set_time(&self, time: SystemTime) {
        *self.now.write().unwrap_or_else(PoisonError::into_inner) = time;
    }
}

impl Default for MockClock {
    fn default() -> Self { Self::new() }
}

impl Clock for MockClock {
    fn now(&self) -> SystemTime { *self.now.read().unwrap_or_else(PoisonError::into_inner) }
}
