//! Clock and timestamp utilities for the render pipeline.
//!
//! Render timestamps are integer microseconds. Anything that waits on a
//! codec takes a [`Clock`] so stall detection can be driven by tests
//! without sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Monotonic time source.
pub trait Clock: Send + Sync {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;
}

/// Wall-independent clock backed by [`Instant`].
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Hand-driven clock for tests.
///
/// With a non-zero `auto_advance`, every `now()` call moves time forward by
/// that step, so a polling loop eventually crosses any deadline.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_us: AtomicU64,
    auto_advance_us: u64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auto_advance(step: Duration) -> Self {
        Self {
            now_us: AtomicU64::new(0),
            auto_advance_us: step.as_micros() as u64,
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now_us
            .fetch_add(by.as_micros() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        let us = self.now_us.fetch_add(self.auto_advance_us, Ordering::SeqCst);
        Duration::from_micros(us)
    }
}

/// A point in time after which a wait is considered stalled.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Duration,
}

impl Deadline {
    pub fn after(clock: &dyn Clock, timeout: Duration) -> Self {
        Self {
            at: clock.now() + timeout,
        }
    }

    pub fn expired(&self, clock: &dyn Clock) -> bool {
        clock.now() >= self.at
    }
}

/// Convert seconds to integer microseconds, rounding to nearest.
pub fn secs_to_us(secs: f64) -> i64 {
    (secs * 1_000_000.0).round() as i64
}

/// Convert integer microseconds to seconds.
pub fn us_to_secs(us: i64) -> f64 {
    us as f64 / 1_000_000.0
}

/// Presentation timestamp of output frame `index` at `fps`.
pub fn frame_timestamp_us(index: u64, fps: f64) -> i64 {
    ((index as f64) * 1_000_000.0 / fps).round() as i64
}

/// Duration of one frame at `fps`, in microseconds.
pub fn frame_duration_us(fps: f64) -> i64 {
    (1_000_000.0 / fps).round() as i64
}
