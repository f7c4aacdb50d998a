//! Time sources used to compute task deadlines.
//!
//! The scheduler never sleeps on a clock directly. It asks the clock how long
//! remains until a deadline and waits on its condition variable for at most
//! that long, re-checking the queue on every wake.

use std::{
    fmt::Debug,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

pub trait Clock: Send + Sync + 'static {
    type TimePoint: Copy + Ord + Debug + Send + Sync + 'static;

    /// Current time.
    fn now(&self) -> Self::TimePoint;

    /// The zero time point. Tasks due at the epoch run immediately.
    fn epoch(&self) -> Self::TimePoint;

    /// `at + by`, saturating at some far-future point instead of overflowing.
    /// Never returns a point earlier than `at`.
    fn add(&self, at: Self::TimePoint, by: Duration) -> Self::TimePoint;

    /// Time left until `deadline`, or zero if it has been reached.
    fn until(&self, deadline: Self::TimePoint) -> Duration;
}

/// Offset from the creation of a [`MonotonicClock`].
///
/// Only meaningful for the clock instance that produced it; two clocks
/// created at different moments map the same `MonoTime` to different
/// instants.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonoTime(Duration);

impl MonoTime {
    pub const ZERO: MonoTime = MonoTime(Duration::ZERO);

    pub fn since_start(&self) -> Duration {
        self.0
    }
}

/// Clock backed by [`Instant`]; unaffected by wall-clock adjustments.
#[derive(Clone, Copy, Debug)]
pub struct MonotonicClock {
    base: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { base: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    type TimePoint = MonoTime;

    fn now(&self) -> MonoTime {
        MonoTime(self.base.elapsed())
    }

    fn epoch(&self) -> MonoTime {
        MonoTime::ZERO
    }

    fn add(&self, at: MonoTime, by: Duration) -> MonoTime {
        MonoTime(at.0.saturating_add(by))
    }

    fn until(&self, deadline: MonoTime) -> Duration {
        deadline.0.saturating_sub(self.base.elapsed())
    }
}

/// Wall-clock time. Deadlines shift if the system clock is adjusted.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

// Roughly 8700 years past the unix epoch, representable on every platform.
const FAR_FUTURE_SECS: u64 = 1 << 38;

impl Clock for SystemClock {
    type TimePoint = SystemTime;

    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn epoch(&self) -> SystemTime {
        UNIX_EPOCH
    }

    fn add(&self, at: SystemTime, by: Duration) -> SystemTime {
        at.checked_add(by)
            .or_else(|| UNIX_EPOCH.checked_add(Duration::from_secs(FAR_FUTURE_SECS)))
            .map_or(at, |t| t.max(at))
    }

    fn until(&self, deadline: SystemTime) -> Duration {
        deadline
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO)
    }
}
