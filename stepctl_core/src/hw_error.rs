//! Maps `Box<dyn Error>` from trait boundaries to typed `ControlError`.
//!
//! The traits in `stepctl_traits` use `Box<dyn Error + Send + Sync>`; this
//! module converts those to our typed error enum, with an optional
//! feature-gated path for `stepctl_hardware::HwError` downcasting.

use crate::error::ControlError;

/// Map a trait-boundary error to a typed `ControlError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> ControlError {
    #[cfg(feature = "hardware-errors")]
    {
        use stepctl_hardware::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::Timeout => ControlError::Timeout,
                HwError::NotDetected(_) => ControlError::SensorNotDetected,
                other => ControlError::HardwareFault(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    let lower = s.to_lowercase();
    if lower.contains("timeout") {
        ControlError::Timeout
    } else if lower.contains("not detected") {
        ControlError::SensorNotDetected
    } else {
        ControlError::Hardware(s)
    }
}

/// Convert a boxed trait error into an `eyre::Report` carrying `ControlError`.
pub(crate) fn to_report(e: &stepctl_traits::BoxError) -> eyre::Report {
    eyre::Report::new(map_hw_error(e.as_ref()))
}
