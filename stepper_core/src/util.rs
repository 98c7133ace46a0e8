//! Common time helpers for stepper_core.

use std::time::Duration;

/// Number of microseconds in one second.
pub const MICROS_PER_SEC: f64 = 1_000_000.0;

/// Seconds as a `Duration`. Negative and non-finite inputs map to zero.
#[inline]
pub fn secs(s: f64) -> Duration {
    if s.is_finite() && s > 0.0 {
        Duration::try_from_secs_f64(s).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}

/// Seconds rounded to whole microseconds, clamped at zero.
#[inline]
pub fn round_us(s: f64) -> u64 {
    let us = (s * MICROS_PER_SEC).round();
    if us.is_finite() && us > 0.0 { us as u64 } else { 0 }
}
