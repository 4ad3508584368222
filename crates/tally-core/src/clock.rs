//! The clock capability.
//!
//! Every "is this in the future?" decision and the repair cutoff read the
//! current instant from a [`Clock`] handed in by the caller. Instants are
//! trimmed to millisecond precision because that is what storage keeps.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use parking_lot::Mutex;

/// Source of the current UTC instant.
pub trait Clock: Send + Sync {
    /// Current instant, millisecond precision.
    fn utc_now(&self) -> DateTime<Utc>;
}

/// Wall clock backed by [`Utc::now`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now().trunc_subsecs(3)
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug)]
pub struct ClockMock {
    now: Mutex<DateTime<Utc>>,
}

impl ClockMock {
    /// Start the clock at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start.trunc_subsecs(3)),
        }
    }

    /// Jump to an absolute instant.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock() = instant.trunc_subsecs(3);
    }

    /// Move the clock forward (or backward, for negative deltas).
    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock();
        *now = (*now + delta).trunc_subsecs(3);
    }
}

impl Clock for ClockMock {
    fn utc_now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
