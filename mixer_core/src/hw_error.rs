//! Maps `Box<dyn Error>` from trait boundaries to typed `MixerError`.
//!
//! The traits in `mixer_traits` use `Box<dyn Error + Send + Sync>` so any
//! backend can plug in; this module converts those to our typed error enum,
//! with an optional feature-gated path for `mixer_hardware::HwError`.

use crate::error::MixerError;

/// Map a trait-boundary error to a typed `MixerError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> MixerError {
    #[cfg(feature = "hardware-errors")]
    {
        use mixer_hardware::error::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::Timeout => MixerError::Timeout,
                HwError::InvalidCommand(msg) => MixerError::Protocol(msg.clone()),
                other => MixerError::HardwareFault(other.to_string()),
            };
        }
    }

    if let Some(m) = e.downcast_ref::<MixerError>() {
        return m.clone();
    }

    let s = e.to_string();
    if s.to_lowercase().contains("timeout") || s.to_lowercase().contains("timed out") {
        MixerError::Timeout
    } else {
        MixerError::Hardware(s)
    }
}
