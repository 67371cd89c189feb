//! Configuration type definitions
//!
//! Every field has a default equal to the value the controller ships with,
//! so a configuration file only needs to name what it changes.

use heapless::Vec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::toml::TomlError;
use crate::schedule::RATE_HISTORY_LEN;
use kiln_protocol::TuningMode;

/// Maximum gain-table bands
pub const MAX_GAIN_BANDS: usize = 8;

/// Configuration validation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// The configuration text could not be parsed
    Parse(TomlError),
    /// A value that must be positive is zero, negative or not finite
    NonPositive(&'static str),
    /// A value lies outside its permitted range
    OutOfRange(&'static str),
    /// A lower bound is not below its upper bound
    Inverted(&'static str),
    /// The gain table has no bands
    EmptyGainTable,
}

impl From<TomlError> for ConfigError {
    fn from(err: TomlError) -> Self {
        ConfigError::Parse(err)
    }
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::Parse(err) => write!(f, "parse error: {}", err),
            ConfigError::NonPositive(field) => write!(f, "{} must be positive", field),
            ConfigError::OutOfRange(field) => write!(f, "{} out of range", field),
            ConfigError::Inverted(field) => write!(f, "{} bounds inverted", field),
            ConfigError::EmptyGainTable => write!(f, "gain table has no bands"),
        }
    }
}

/// Safety limits
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SafetyConfig {
    /// Absolute maximum kiln temperature (°C)
    pub max_temp_c: f32,
    /// Allowed excess of measured over target temperature while heating (°C)
    pub max_temp_error_c: f32,
    /// Lowest plausible thermocouple reading (°C)
    pub sensor_min_c: f32,
    /// Highest plausible thermocouple reading (°C)
    pub sensor_max_c: f32,
    /// Consecutive sensor faults tolerated before shutdown
    pub sensor_fault_limit: u8,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_temp_c: 1300.0,
            max_temp_error_c: 50.0,
            sensor_min_c: -20.0,
            sensor_max_c: 1370.0,
            sensor_fault_limit: 10,
        }
    }
}

/// Control loop cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TimingConfig {
    /// Control cycle period (ms)
    pub control_period_ms: u32,
    /// Relay sub-step period within a control cycle (ms)
    pub relay_period_ms: u32,
    /// Minimum spacing of periodic status publications (ms)
    pub status_interval_ms: u32,
    /// How long the host link waits for the control context to come up (ms)
    pub ready_timeout_ms: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            control_period_ms: 1000,
            relay_period_ms: 100,
            status_interval_ms: 1000,
            ready_timeout_ms: 5000,
        }
    }
}

/// Solid-state relay switching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RelayConfig {
    /// Time-proportional cycle length (ms)
    pub cycle_ms: u32,
    /// Delay between switching successive relay pins (ms)
    pub stagger_ms: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            cycle_ms: 2000,
            stagger_ms: 10,
        }
    }
}

/// Adaptive ramp-rate policy
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AdaptationConfig {
    /// Rate history sampling interval (s)
    pub sample_interval_s: u32,
    /// Window over which the measured rate is fitted (s)
    pub rate_window_s: u32,
    /// How often adaptation is considered (s)
    pub check_interval_s: u32,
    /// Minimum time in a step before adapting (s)
    pub min_step_time_s: u32,
    /// Minimum time between two adaptations (s)
    pub min_spacing_s: u32,
    /// Relay duty at or above which output counts as saturated (%)
    pub saturation_percent: f32,
    /// Fraction of the commanded rate below which the kiln is lagging
    pub rate_threshold: f32,
    /// Tracking error required before adapting (°C)
    pub error_threshold_c: f32,
    /// Factor applied to the measured rate to get the new rate
    pub reduction_factor: f32,
}

impl Default for AdaptationConfig {
    fn default() -> Self {
        Self {
            sample_interval_s: 10,
            rate_window_s: 600,
            check_interval_s: 60,
            min_step_time_s: 600,
            min_spacing_s: 300,
            saturation_percent: 95.0,
            rate_threshold: 0.85,
            error_threshold_c: 20.0,
            reduction_factor: 0.9,
        }
    }
}

/// Recovery after an interrupted firing
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RecoveryConfig {
    /// Temperature loss that triggers a recovery hold (°C)
    pub threshold_c: f32,
    /// Distance from the recovery target at which recovery ends (°C)
    pub tolerance_c: f32,
    /// Assumed starting temperature when replaying a profile (°C)
    pub ambient_temp_c: f32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            threshold_c: 5.0,
            tolerance_c: 1.0,
            ambient_temp_c: 20.0,
        }
    }
}

/// PID gains and output bounds
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PidConfig {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    /// Lowest output (%)
    pub output_min: f32,
    /// Highest output (%)
    pub output_max: f32,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            kp: 20.0,
            ki: 0.05,
            kd: 100.0,
            output_min: 0.0,
            output_max: 100.0,
        }
    }
}

/// One temperature band of a gain table
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GainBand {
    /// Band applies below this temperature (°C)
    pub below_c: f32,
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

/// Gain scheduling strategy
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum GainScheduleConfig {
    /// Configured gains at every temperature
    Fixed,
    /// Gains grow linearly above a reference temperature
    Continuous {
        /// Scaling starts above this temperature (°C)
        reference_c: f32,
        /// Gain increase per degree above the reference
        scale_per_c: f32,
        /// Upper bound on the scale factor
        max_factor: f32,
    },
    /// Discrete bands sorted by upper temperature
    Table(Vec<GainBand, MAX_GAIN_BANDS>),
}

impl Default for GainScheduleConfig {
    fn default() -> Self {
        GainScheduleConfig::Continuous {
            reference_c: 600.0,
            scale_per_c: 0.001,
            max_factor: 1.5,
        }
    }
}

/// Target and timeout of one tuning mode
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TuningModeConfig {
    /// Temperature the step response drives to (°C)
    pub target_c: f32,
    /// Session timeout (s)
    pub timeout_s: u32,
}

/// Step-response tuning
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TuningConfig {
    pub safe: TuningModeConfig,
    pub standard: TuningModeConfig,
    pub thorough: TuningModeConfig,
    /// Tangent window divisor for the model fit
    pub tangent_divisor: f32,
}

impl TuningConfig {
    /// Settings for a tuning mode
    pub fn mode(&self, mode: TuningMode) -> TuningModeConfig {
        match mode {
            TuningMode::Safe => self.safe,
            TuningMode::Standard => self.standard,
            TuningMode::Thorough => self.thorough,
        }
    }
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            safe: TuningModeConfig {
                target_c: 100.0,
                timeout_s: 3600,
            },
            standard: TuningModeConfig {
                target_c: 200.0,
                timeout_s: 7200,
            },
            thorough: TuningModeConfig {
                target_c: 400.0,
                timeout_s: 14_400,
            },
            tangent_divisor: 8.0,
        }
    }
}

/// Bounded retry of recoverable operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RetryConfig {
    /// Attempts made to load a profile
    pub profile_load_attempts: u8,
    /// Delay before the second attempt; grows linearly after that (ms)
    pub base_delay_ms: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            profile_load_attempts: 3,
            base_delay_ms: 100,
        }
    }
}

/// Complete controller configuration
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KilnConfig {
    pub safety: SafetyConfig,
    pub timing: TimingConfig,
    pub relay: RelayConfig,
    pub adaptation: AdaptationConfig,
    pub recovery: RecoveryConfig,
    pub pid: PidConfig,
    pub gain_schedule: GainScheduleConfig,
    pub tuning: TuningConfig,
    pub retry: RetryConfig,
}

fn positive(value: f32, field: &'static str) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NonPositive(field))
    }
}

fn non_negative(value: f32, field: &'static str) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange(field))
    }
}

fn nonzero(value: u32, field: &'static str) -> Result<(), ConfigError> {
    if value > 0 {
        Ok(())
    } else {
        Err(ConfigError::NonPositive(field))
    }
}

fn fraction(value: f32, field: &'static str) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange(field))
    }
}

impl KilnConfig {
    /// Check every value before any hardware is armed
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.safety;
        if !(s.sensor_min_c.is_finite() && s.sensor_max_c.is_finite()) {
            return Err(ConfigError::OutOfRange("safety.sensor range"));
        }
        if s.sensor_min_c >= s.sensor_max_c {
            return Err(ConfigError::Inverted("safety.sensor range"));
        }
        positive(s.max_temp_c, "safety.max_temp")?;
        if s.max_temp_c >= s.sensor_max_c {
            return Err(ConfigError::OutOfRange("safety.max_temp"));
        }
        positive(s.max_temp_error_c, "safety.max_temp_error")?;
        if s.sensor_fault_limit == 0 {
            return Err(ConfigError::NonPositive("safety.sensor_fault_limit"));
        }

        let t = &self.timing;
        nonzero(t.control_period_ms, "timing.control_period_ms")?;
        nonzero(t.relay_period_ms, "timing.relay_period_ms")?;
        if t.relay_period_ms > t.control_period_ms {
            return Err(ConfigError::OutOfRange("timing.relay_period_ms"));
        }
        nonzero(t.ready_timeout_ms, "timing.ready_timeout_ms")?;

        nonzero(self.relay.cycle_ms, "relay.cycle_ms")?;
        if self.relay.cycle_ms < self.timing.relay_period_ms {
            return Err(ConfigError::OutOfRange("relay.cycle_ms"));
        }

        let a = &self.adaptation;
        nonzero(a.sample_interval_s, "adaptation.sample_interval_s")?;
        nonzero(a.check_interval_s, "adaptation.check_interval_s")?;
        if a.rate_window_s < a.sample_interval_s * 2 {
            return Err(ConfigError::OutOfRange("adaptation.rate_window_s"));
        }
        // A window longer than the history would be silently truncated
        if (a.rate_window_s / a.sample_interval_s) as usize + 1 > RATE_HISTORY_LEN {
            return Err(ConfigError::OutOfRange("adaptation.rate_window_s"));
        }
        if !(a.saturation_percent > 0.0 && a.saturation_percent <= 100.0) {
            return Err(ConfigError::OutOfRange("adaptation.saturation_percent"));
        }
        fraction(a.rate_threshold, "adaptation.rate_threshold")?;
        fraction(a.reduction_factor, "adaptation.reduction_factor")?;
        non_negative(a.error_threshold_c, "adaptation.error_threshold")?;

        let r = &self.recovery;
        non_negative(r.threshold_c, "recovery.threshold")?;
        positive(r.tolerance_c, "recovery.tolerance")?;
        if !r.ambient_temp_c.is_finite() {
            return Err(ConfigError::OutOfRange("recovery.ambient_temp"));
        }

        let p = &self.pid;
        non_negative(p.kp, "pid.kp")?;
        non_negative(p.ki, "pid.ki")?;
        non_negative(p.kd, "pid.kd")?;
        if !(p.output_min.is_finite() && p.output_max.is_finite()) {
            return Err(ConfigError::OutOfRange("pid.output bounds"));
        }
        if p.output_min >= p.output_max {
            return Err(ConfigError::Inverted("pid.output bounds"));
        }

        match &self.gain_schedule {
            GainScheduleConfig::Fixed => {}
            GainScheduleConfig::Continuous {
                reference_c,
                scale_per_c,
                max_factor,
            } => {
                non_negative(*reference_c, "gain_schedule.reference")?;
                non_negative(*scale_per_c, "gain_schedule.scale_per_c")?;
                if !(max_factor.is_finite() && *max_factor >= 1.0) {
                    return Err(ConfigError::OutOfRange("gain_schedule.max_factor"));
                }
            }
            GainScheduleConfig::Table(bands) => {
                if bands.is_empty() {
                    return Err(ConfigError::EmptyGainTable);
                }
                let mut previous = f32::NEG_INFINITY;
                for band in bands {
                    if !band.below_c.is_finite() || band.below_c <= previous {
                        return Err(ConfigError::OutOfRange("gain_schedule.bands"));
                    }
                    previous = band.below_c;
                    non_negative(band.kp, "gain_schedule.bands.kp")?;
                    non_negative(band.ki, "gain_schedule.bands.ki")?;
                    non_negative(band.kd, "gain_schedule.bands.kd")?;
                }
            }
        }

        for mode in [
            self.tuning.safe,
            self.tuning.standard,
            self.tuning.thorough,
        ] {
            positive(mode.target_c, "tuning.target")?;
            if mode.target_c > s.max_temp_c {
                return Err(ConfigError::OutOfRange("tuning.target"));
            }
            nonzero(mode.timeout_s, "tuning.timeout_s")?;
        }
        if !(self.tuning.tangent_divisor.is_finite() && self.tuning.tangent_divisor > 2.0) {
            return Err(ConfigError::OutOfRange("tuning.tangent_divisor"));
        }

        if self.retry.profile_load_attempts == 0 {
            return Err(ConfigError::NonPositive("retry.profile_load_attempts"));
        }

        Ok(())
    }
}
