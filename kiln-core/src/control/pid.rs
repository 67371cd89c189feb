//! PID temperature controller
//!
//! Standard-form PID with clamped-integral anti-windup: the integral
//! accumulator itself is bounded to the value that would saturate the
//! output, so it never winds up past what the relay can deliver.

use kiln_protocol::PidStatus;

use crate::config::PidConfig;

/// Smallest time step used when calls arrive out of order or together (s)
const MIN_DT_S: f32 = 0.001;

/// Time step assumed on the first update after a reset (s)
const FIRST_DT_S: f32 = 1.0;

/// PID gains
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PidGains {
    /// Proportional gain (Kp)
    pub kp: f32,
    /// Integral gain (Ki)
    pub ki: f32,
    /// Derivative gain (Kd)
    pub kd: f32,
}

impl PidGains {
    pub const fn new(kp: f32, ki: f32, kd: f32) -> Self {
        Self { kp, ki, kd }
    }
}

/// Contribution of each term in the last update
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PidTerms {
    pub p: f32,
    pub i: f32,
    pub d: f32,
}

/// PID controller with live gain updates
#[derive(Debug, Clone)]
pub struct Pid {
    gains: PidGains,
    output_min: f32,
    output_max: f32,
    integral: f32,
    prev_error: f32,
    last_time_ms: Option<u64>,
    terms: PidTerms,
}

impl Pid {
    /// Create a controller with the given gains and output bounds
    pub fn new(gains: PidGains, output_min: f32, output_max: f32) -> Self {
        Self {
            gains,
            output_min,
            output_max,
            integral: 0.0,
            prev_error: 0.0,
            last_time_ms: None,
            terms: PidTerms::default(),
        }
    }

    /// Create a controller from configuration
    pub fn from_config(config: &PidConfig) -> Self {
        Self::new(
            PidGains::new(config.kp, config.ki, config.kd),
            config.output_min,
            config.output_max,
        )
    }

    /// Compute the output for one control step
    pub fn update(&mut self, setpoint: f32, measured: f32, now_ms: u64) -> f32 {
        let dt = match self.last_time_ms {
            None => FIRST_DT_S,
            Some(last) => {
                let dt = now_ms.saturating_sub(last) as f32 / 1000.0;
                if dt > 0.0 {
                    dt
                } else {
                    MIN_DT_S
                }
            }
        };
        self.last_time_ms = Some(now_ms);

        let error = setpoint - measured;

        self.integral += error * dt;
        if self.gains.ki != 0.0 {
            let ki = libm::fabsf(self.gains.ki);
            self.integral = self
                .integral
                .clamp(self.output_min / ki, self.output_max / ki);
        }

        let derivative = (error - self.prev_error) / dt;
        self.prev_error = error;

        self.terms = PidTerms {
            p: self.gains.kp * error,
            i: self.gains.ki * self.integral,
            d: self.gains.kd * derivative,
        };

        let output = self.terms.p + self.terms.i + self.terms.d;
        if output.is_nan() {
            return self.output_min;
        }
        output.clamp(self.output_min, self.output_max)
    }

    /// Zero the error, integral and timing state; gains are kept
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = 0.0;
        self.last_time_ms = None;
        self.terms = PidTerms::default();
    }

    /// Change any subset of the gains
    ///
    /// Takes effect on the next `update`. Accumulated state is kept; call
    /// [`Pid::reset`] if it no longer applies.
    pub fn set_gains(&mut self, kp: Option<f32>, ki: Option<f32>, kd: Option<f32>) {
        if let Some(kp) = kp {
            self.gains.kp = kp;
        }
        if let Some(ki) = ki {
            self.gains.ki = ki;
        }
        if let Some(kd) = kd {
            self.gains.kd = kd;
        }
    }

    /// Replace all three gains
    pub fn apply_gains(&mut self, gains: PidGains) {
        self.set_gains(Some(gains.kp), Some(gains.ki), Some(gains.kd));
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    pub fn integral(&self) -> f32 {
        self.integral
    }

    pub fn terms(&self) -> PidTerms {
        self.terms
    }

    /// Gains and term contributions for status reports
    pub fn status(&self) -> PidStatus {
        PidStatus {
            kp: self.gains.kp,
            ki: self.gains.ki,
            kd: self.gains.kd,
            p_term: self.terms.p,
            i_term: self.terms.i,
            d_term: self.terms.d,
        }
    }
}
