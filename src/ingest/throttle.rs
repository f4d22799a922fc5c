//! Frame-rate throttling and reconnect backoff.
//!
//! Pure functions of (frame index, native rate, target rate) and (attempt),
//! kept apart from the blocking reader loop that calls them.

use std::time::Duration;

/// Validate a configured target frame rate.
///
/// Only positive integers are accepted. Anything else logs a warning and
/// disables throttling.
pub fn validate_fps(source_id: &str, fps: Option<f64>) -> Option<u32> {
    let fps = fps?;
    if fps.is_finite() && fps >= 1.0 && fps.fract() == 0.0 && fps <= u32::MAX as f64 {
        Some(fps as u32)
    } else {
        log::warn!(
            "invalid fps value {} for source {}; using native frame rate",
            fps,
            source_id
        );
        None
    }
}

/// True when throttling cannot drop anything because the source is no faster
/// than the target.
pub fn at_or_above_native(native_fps: f64, target: Option<u32>) -> bool {
    target.is_some_and(|target| target as f64 >= native_fps.trunc())
}

/// Decide whether frame `index` (0-based, counted per connection) is dropped.
///
/// The stride is `native / target` using the integer part of the native rate,
/// and a frame is kept when `index % stride < 1`. A fractional stride therefore
/// keeps frames at the target rate on average.
pub fn should_skip(index: u64, native_fps: f64, target: Option<u32>) -> bool {
    let Some(target) = target else {
        return false;
    };
    let native = native_fps.trunc();
    if !native.is_finite() || native <= target as f64 {
        return false;
    }
    let stride = native / target as f64;
    (index as f64) % stride >= 1.0
}

/// Delay between reconnect attempts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    pub base: Duration,
    /// Multiplier applied per consecutive failed attempt. 1.0 keeps the delay fixed.
    pub factor: f64,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 1.0,
            max: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base: delay,
            factor: 1.0,
            max: delay,
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based count of consecutive failures).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let factor = self.factor.max(1.0).powi(exponent);
        let secs = self.base.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            return self.max.max(self.base);
        }
        Duration::from_secs_f64(secs)
    }
}
