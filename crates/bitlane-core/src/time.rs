use std::time::{Duration, Instant};

/// Time context passed into per-tick `update` calls.
///
/// The core never reads a clock itself. Production callers tick `time` from
/// a monotonic clock; tests advance it manually with [`TimeBase::advance`].
#[derive(Debug, Clone, Copy)]
pub struct TimeBase {
    /// Current time for this tick.
    pub time: Instant,
    /// Interval between ticks.
    pub delta_time: Duration,
}

impl TimeBase {
    /// Creates a time base starting at `time` with the given tick interval.
    pub fn new(time: Instant, delta_time: Duration) -> Self {
        Self { time, delta_time }
    }

    /// Advances `time` by one tick interval.
    pub fn advance(&mut self) {
        self.time += self.delta_time;
    }
}
