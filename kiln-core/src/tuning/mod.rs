//! Ziegler-Nichols open-loop tuning

pub mod fit;
pub mod tuner;

pub use fit::calculate_pid_parameters;
pub use tuner::Tuner;

/// Tuning failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TuningError {
    /// Fewer samples than a fit needs
    InsufficientData,
    /// Response curve gives no usable tangent
    DegenerateFit,
    /// Session exceeded its time limit
    Timeout,
    /// Temperature above the safety limit
    OverTemperature,
    /// Thermocouple failed during the session
    SensorFault,
    /// Stopped by the operator
    Cancelled,
    /// Requested target outside the safe range
    InvalidTarget,
}

impl core::fmt::Display for TuningError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let text = match self {
            TuningError::InsufficientData => "not enough samples",
            TuningError::DegenerateFit => "response could not be fitted",
            TuningError::Timeout => "session timed out",
            TuningError::OverTemperature => "over temperature",
            TuningError::SensorFault => "sensor fault",
            TuningError::Cancelled => "cancelled",
            TuningError::InvalidTarget => "target out of range",
        };
        f.write_str(text)
    }
}
