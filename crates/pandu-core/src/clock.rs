//! Time sources for expiry decisions.
//!
//! Every expiry rule compares against a timestamp handed out by a [`Clock`].
//! Callers must supply a non-decreasing clock; skew is not detected.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Supplies the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock backed by `Utc::now`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Used by tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    /// Move forward by `delta` and return the new time.
    pub fn advance(&self, delta: Duration) -> DateTime<Utc> {
        let mut now = self.now.lock();
        *now += delta;
        *now
    }
}

impl Default for ManualClock {
    /// Frozen at the Unix epoch.
    fn default() -> Self {
        Self::new(DateTime::UNIX_EPOCH)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Convert configured seconds into a duration, saturating at the maximum.
pub(crate) fn seconds(value: u64) -> Duration {
    i64::try_from(value)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

/// Elapsed time from `since` to `now`, clamped at zero.
pub(crate) fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).max(Duration::zero())
}

#[cfg(test)]
mod tests {
    use super::{Clock, ManualClock, elapsed, seconds};
    use chrono::{DateTime, Duration};
    use pretty_assertions::assert_eq;

    #[test]
    fn manual_clock_advances_and_sets() {
        let clock = ManualClock::default();
        assert_eq!(clock.now(), DateTime::UNIX_EPOCH);
        let later = clock.advance(Duration::seconds(90));
        assert_eq!(later, DateTime::UNIX_EPOCH + Duration::seconds(90));
        assert_eq!(clock.now(), later);
        clock.set(DateTime::UNIX_EPOCH);
        assert_eq!(clock.now(), DateTime::UNIX_EPOCH);
    }

    #[test]
    fn seconds_saturates() {
        assert_eq!(seconds(90), Duration::seconds(90));
        assert_eq!(seconds(u64::MAX), Duration::MAX);
    }

    #[test]
    fn elapsed_clamps_backwards_time() {
        let start = DateTime::UNIX_EPOCH + Duration::seconds(10);
        assert_eq!(elapsed(start, DateTime::UNIX_EPOCH), Duration::zero());
        assert_eq!(
            elapsed(DateTime::UNIX_EPOCH, start),
            Duration::seconds(10)
        );
    }
}
