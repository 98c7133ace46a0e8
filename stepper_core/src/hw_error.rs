//! Maps `Box<dyn Error>` from trait boundaries to typed `MotionError`.
//!
//! The traits in `stepper_traits` use `Box<dyn Error + Send + Sync>` so any
//! GPIO backend can plug in; this module converts those to our typed error
//! enum, with an optional feature-gated path for `stepper_hardware::HwError`
//! downcasting.

use crate::error::MotionError;

/// Map a trait-boundary error to a typed `MotionError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> MotionError {
    #[cfg(feature = "hardware-errors")]
    {
        use stepper_hardware::error::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::Disconnected => MotionError::HardwareDisconnected,
                HwError::QueueRejected(reason) => MotionError::QueueRejected(reason.clone()),
                other => MotionError::Hardware(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    let lower = s.to_lowercase();
    if lower.contains("disconnected") || lower.contains("not connected") {
        MotionError::HardwareDisconnected
    } else {
        MotionError::Hardware(s)
    }
}
