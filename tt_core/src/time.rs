// ABOUTME: Time helpers for wall-clock timestamps and latency measurement.
// ABOUTME: Wall-clock time is chrono UTC; latency uses a monotonic clock.
use chrono::{DateTime, Utc};
use std::time::Instant;

/// Get the current UTC wall-clock time
pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}

/// Milliseconds elapsed between two wall-clock timestamps, clamped at zero
pub fn millis_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds().max(0) as f64
}

/// Monotonic timer for measuring query latency
///
/// # Examples
///
/// ```
/// use tt_core::LatencyTimer;
/// let timer = LatencyTimer::start();
/// let elapsed = timer.elapsed_ms();
/// assert!(elapsed >= 0.0);
/// ```
#[derive(Debug)]
pub struct LatencyTimer {
    started: Instant,
}

impl LatencyTimer {
    /// Start a new timer
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    /// Elapsed time since start, in fractional milliseconds
    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }
}
