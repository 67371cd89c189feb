//! Gain scheduling
//!
//! Kiln dynamics change with temperature: heat loss grows steeply at
//! glaze temperatures, so the same gains that are calm at 300 °C are
//! sluggish near cone 6. A schedule maps the measured temperature to the
//! gains used for the next update.

use heapless::Vec;

use super::pid::PidGains;
use crate::config::{GainBand, GainScheduleConfig, PidConfig, MAX_GAIN_BANDS};

/// Strategy for choosing gains from temperature
pub trait GainSchedule {
    /// Gains to use at `temp`
    fn gains_at(&self, temp: f32) -> PidGains;

    /// Replace the base gains, e.g. after tuning
    fn set_base(&mut self, gains: PidGains);
}

/// Gains scale linearly above a reference temperature, up to a cap
///
/// Only Kp and Ki are scaled; the derivative term already grows with the
/// faster dynamics at high temperature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContinuousSchedule {
    pub base: PidGains,
    pub reference_c: f32,
    pub scale_per_c: f32,
    pub max_factor: f32,
}

impl ContinuousSchedule {
    /// Multiplier applied at `temp`
    pub fn factor(&self, temp: f32) -> f32 {
        let above = (temp - self.reference_c).max(0.0);
        (1.0 + above * self.scale_per_c).clamp(1.0, self.max_factor)
    }
}

impl GainSchedule for ContinuousSchedule {
    fn gains_at(&self, temp: f32) -> PidGains {
        let factor = self.factor(temp);
        PidGains {
            kp: self.base.kp * factor,
            ki: self.base.ki * factor,
            kd: self.base.kd,
        }
    }

    fn set_base(&mut self, gains: PidGains) {
        self.base = gains;
    }
}

/// Discrete temperature bands, each with its own gains
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchedule {
    bands: Vec<GainBand, MAX_GAIN_BANDS>,
    /// Gains set by tuning override the table everywhere
    tuned: Option<PidGains>,
}

impl TableSchedule {
    pub fn new(bands: Vec<GainBand, MAX_GAIN_BANDS>) -> Self {
        Self { bands, tuned: None }
    }
}

impl GainSchedule for TableSchedule {
    fn gains_at(&self, temp: f32) -> PidGains {
        if let Some(tuned) = self.tuned {
            return tuned;
        }
        // Above the last band the hottest band applies
        let band = self
            .bands
            .iter()
            .find(|band| temp < band.below_c)
            .or_else(|| self.bands.last());
        match band {
            Some(band) => PidGains::new(band.kp, band.ki, band.kd),
            None => PidGains::default(),
        }
    }

    fn set_base(&mut self, gains: PidGains) {
        self.tuned = Some(gains);
    }
}

/// The schedule selected by configuration
#[derive(Debug, Clone, PartialEq)]
pub enum Scheduler {
    Fixed(PidGains),
    Continuous(ContinuousSchedule),
    Table(TableSchedule),
}

impl Scheduler {
    pub fn from_config(pid: &PidConfig, schedule: &GainScheduleConfig) -> Self {
        let base = PidGains::new(pid.kp, pid.ki, pid.kd);
        match schedule {
            GainScheduleConfig::Fixed => Scheduler::Fixed(base),
            GainScheduleConfig::Continuous {
                reference_c,
                scale_per_c,
                max_factor,
            } => Scheduler::Continuous(ContinuousSchedule {
                base,
                reference_c: *reference_c,
                scale_per_c: *scale_per_c,
                max_factor: *max_factor,
            }),
            GainScheduleConfig::Table(bands) => Scheduler::Table(TableSchedule::new(bands.clone())),
        }
    }
}

impl GainSchedule for Scheduler {
    fn gains_at(&self, temp: f32) -> PidGains {
        match self {
            Scheduler::Fixed(gains) => *gains,
            Scheduler::Continuous(s) => s.gains_at(temp),
            Scheduler::Table(s) => s.gains_at(temp),
        }
    }

    fn set_base(&mut self, gains: PidGains) {
        match self {
            Scheduler::Fixed(base) => *base = gains,
            Scheduler::Continuous(s) => s.set_base(gains),
            Scheduler::Table(s) => s.set_base(gains),
        }
    }
}
