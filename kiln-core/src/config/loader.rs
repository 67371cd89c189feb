//! Configuration file loading
//!
//! Reads `kiln.toml` into a [`KilnConfig`]. Omitted keys keep their
//! defaults; unknown sections and keys are errors so typos are caught
//! before the kiln is armed. `[profile.*]` sections are skipped here and
//! read by [`super::TomlProfiles`].

use heapless::Vec;

use super::toml::{inline_tables, items, parse_f32, parse_int, parse_str, table_pairs, Item, TomlErrorKind};
use super::types::*;

/// Section currently being read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Root,
    Safety,
    Timing,
    Relay,
    Adaptation,
    Recovery,
    Pid,
    GainSchedule,
    Tuning,
    Retry,
    Profile,
}

impl Section {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "safety" => Section::Safety,
            "timing" => Section::Timing,
            "relay" => Section::Relay,
            "adaptation" => Section::Adaptation,
            "recovery" => Section::Recovery,
            "pid" => Section::Pid,
            "gain_schedule" => Section::GainSchedule,
            "tuning" => Section::Tuning,
            "retry" => Section::Retry,
            _ if name.starts_with("profile.") => Section::Profile,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScheduleMode {
    Fixed,
    Continuous,
    Table,
}

/// Gain schedule keys collected before the variant is known
struct GainScheduleDraft {
    mode: Option<ScheduleMode>,
    reference_c: f32,
    scale_per_c: f32,
    max_factor: f32,
    bands: Vec<GainBand, MAX_GAIN_BANDS>,
}

impl Default for GainScheduleDraft {
    fn default() -> Self {
        let (reference_c, scale_per_c, max_factor) = match GainScheduleConfig::default() {
            GainScheduleConfig::Continuous {
                reference_c,
                scale_per_c,
                max_factor,
            } => (reference_c, scale_per_c, max_factor),
            _ => (600.0, 0.001, 1.5),
        };
        Self {
            mode: None,
            reference_c,
            scale_per_c,
            max_factor,
            bands: Vec::new(),
        }
    }
}

impl GainScheduleDraft {
    fn build(self) -> GainScheduleConfig {
        // A table without an explicit mode implies table scheduling
        let mode = self.mode.unwrap_or(if self.bands.is_empty() {
            ScheduleMode::Continuous
        } else {
            ScheduleMode::Table
        });
        match mode {
            ScheduleMode::Fixed => GainScheduleConfig::Fixed,
            ScheduleMode::Continuous => GainScheduleConfig::Continuous {
                reference_c: self.reference_c,
                scale_per_c: self.scale_per_c,
                max_factor: self.max_factor,
            },
            ScheduleMode::Table => GainScheduleConfig::Table(self.bands),
        }
    }
}

impl KilnConfig {
    /// Parse and validate a configuration document
    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        let mut config = KilnConfig::default();
        let mut schedule = GainScheduleDraft::default();
        let mut section = Section::Root;

        for item in items(input) {
            let (line, item) = item?;
            match item {
                Item::Section(name) => {
                    section = Section::from_name(name)
                        .ok_or(TomlErrorKind::UnknownSection.at(line))?;
                }
                Item::Pair { key, value } => {
                    set_key(&mut config, &mut schedule, section, key, value)
                        .map_err(|kind| kind.at(line))?;
                }
            }
        }

        config.gain_schedule = schedule.build();
        config.validate()?;
        Ok(config)
    }
}

fn set_key(
    config: &mut KilnConfig,
    schedule: &mut GainScheduleDraft,
    section: Section,
    key: &str,
    value: &str,
) -> Result<(), TomlErrorKind> {
    match section {
        Section::Root => Err(TomlErrorKind::UnknownKey),
        Section::Profile => Ok(()),
        Section::Safety => set_safety(&mut config.safety, key, value),
        Section::Timing => set_timing(&mut config.timing, key, value),
        Section::Relay => {
            let relay = &mut config.relay;
            match key {
                "cycle_ms" => relay.cycle_ms = parse_int(value)?,
                "stagger_ms" => relay.stagger_ms = parse_int(value)?,
                _ => return Err(TomlErrorKind::UnknownKey),
            }
            Ok(())
        }
        Section::Adaptation => set_adaptation(&mut config.adaptation, key, value),
        Section::Recovery => {
            let recovery = &mut config.recovery;
            match key {
                "threshold" => recovery.threshold_c = parse_f32(value)?,
                "tolerance" => recovery.tolerance_c = parse_f32(value)?,
                "ambient_temp" => recovery.ambient_temp_c = parse_f32(value)?,
                _ => return Err(TomlErrorKind::UnknownKey),
            }
            Ok(())
        }
        Section::Pid => {
            let pid = &mut config.pid;
            match key {
                "kp" => pid.kp = parse_f32(value)?,
                "ki" => pid.ki = parse_f32(value)?,
                "kd" => pid.kd = parse_f32(value)?,
                "output_min" => pid.output_min = parse_f32(value)?,
                "output_max" => pid.output_max = parse_f32(value)?,
                _ => return Err(TomlErrorKind::UnknownKey),
            }
            Ok(())
        }
        Section::GainSchedule => set_gain_schedule(schedule, key, value),
        Section::Tuning => set_tuning(&mut config.tuning, key, value),
        Section::Retry => {
            let retry = &mut config.retry;
            match key {
                "profile_load_attempts" => retry.profile_load_attempts = parse_int(value)?,
                "base_delay_ms" => retry.base_delay_ms = parse_int(value)?,
                _ => return Err(TomlErrorKind::UnknownKey),
            }
            Ok(())
        }
    }
}

fn set_safety(safety: &mut SafetyConfig, key: &str, value: &str) -> Result<(), TomlErrorKind> {
    match key {
        "max_temp" => safety.max_temp_c = parse_f32(value)?,
        "max_temp_error" => safety.max_temp_error_c = parse_f32(value)?,
        "sensor_min" => safety.sensor_min_c = parse_f32(value)?,
        "sensor_max" => safety.sensor_max_c = parse_f32(value)?,
        "sensor_fault_limit" => safety.sensor_fault_limit = parse_int(value)?,
        _ => return Err(TomlErrorKind::UnknownKey),
    }
    Ok(())
}

fn set_timing(timing: &mut TimingConfig, key: &str, value: &str) -> Result<(), TomlErrorKind> {
    match key {
        "control_period_ms" => timing.control_period_ms = parse_int(value)?,
        "relay_period_ms" => timing.relay_period_ms = parse_int(value)?,
        "status_interval_ms" => timing.status_interval_ms = parse_int(value)?,
        "ready_timeout_ms" => timing.ready_timeout_ms = parse_int(value)?,
        _ => return Err(TomlErrorKind::UnknownKey),
    }
    Ok(())
}

fn set_adaptation(a: &mut AdaptationConfig, key: &str, value: &str) -> Result<(), TomlErrorKind> {
    match key {
        "sample_interval_s" => a.sample_interval_s = parse_int(value)?,
        "rate_window_s" => a.rate_window_s = parse_int(value)?,
        "check_interval_s" => a.check_interval_s = parse_int(value)?,
        "min_step_time_s" => a.min_step_time_s = parse_int(value)?,
        "min_spacing_s" => a.min_spacing_s = parse_int(value)?,
        "saturation_percent" => a.saturation_percent = parse_f32(value)?,
        "rate_threshold" => a.rate_threshold = parse_f32(value)?,
        "error_threshold" => a.error_threshold_c = parse_f32(value)?,
        "reduction_factor" => a.reduction_factor = parse_f32(value)?,
        _ => return Err(TomlErrorKind::UnknownKey),
    }
    Ok(())
}

fn set_gain_schedule(
    schedule: &mut GainScheduleDraft,
    key: &str,
    value: &str,
) -> Result<(), TomlErrorKind> {
    match key {
        "mode" => {
            schedule.mode = Some(match parse_str(value)? {
                "fixed" => ScheduleMode::Fixed,
                "continuous" => ScheduleMode::Continuous,
                "table" => ScheduleMode::Table,
                _ => return Err(TomlErrorKind::InvalidValue),
            });
        }
        "reference" => schedule.reference_c = parse_f32(value)?,
        "scale_per_c" => schedule.scale_per_c = parse_f32(value)?,
        "max_factor" => schedule.max_factor = parse_f32(value)?,
        "bands" => {
            schedule.bands.clear();
            for table in inline_tables(value)? {
                let band = parse_band(table?)?;
                schedule
                    .bands
                    .push(band)
                    .map_err(|_| TomlErrorKind::TooManyItems)?;
            }
        }
        _ => return Err(TomlErrorKind::UnknownKey),
    }
    Ok(())
}

/// `{ below = 600, kp = 20, ki = 0.05, kd = 100 }`
fn parse_band(table: &str) -> Result<GainBand, TomlErrorKind> {
    let (mut below, mut kp, mut ki, mut kd) = (None, None, None, None);
    for pair in table_pairs(table) {
        let (key, value) = pair?;
        let slot = match key {
            "below" => &mut below,
            "kp" => &mut kp,
            "ki" => &mut ki,
            "kd" => &mut kd,
            _ => return Err(TomlErrorKind::UnknownKey),
        };
        *slot = Some(parse_f32(value)?);
    }
    Ok(GainBand {
        below_c: below.ok_or(TomlErrorKind::MissingKey)?,
        kp: kp.ok_or(TomlErrorKind::MissingKey)?,
        ki: ki.ok_or(TomlErrorKind::MissingKey)?,
        kd: kd.ok_or(TomlErrorKind::MissingKey)?,
    })
}

fn set_tuning(tuning: &mut TuningConfig, key: &str, value: &str) -> Result<(), TomlErrorKind> {
    match key {
        "tangent_divisor" => tuning.tangent_divisor = parse_f32(value)?,
        "safe_target" => tuning.safe.target_c = parse_f32(value)?,
        "safe_timeout_s" => tuning.safe.timeout_s = parse_int(value)?,
        "standard_target" => tuning.standard.target_c = parse_f32(value)?,
        "standard_timeout_s" => tuning.standard.timeout_s = parse_int(value)?,
        "thorough_target" => tuning.thorough.target_c = parse_f32(value)?,
        "thorough_timeout_s" => tuning.thorough.timeout_s = parse_int(value)?,
        _ => return Err(TomlErrorKind::UnknownKey),
    }
    Ok(())
}
