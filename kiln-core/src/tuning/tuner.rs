//! Open-loop step-response tuner
//!
//! Drives the relay fully on until the target is reached, then fully off
//! until the kiln falls back to the target, recording the response
//! throughout. The recorded curve is then fitted to produce PID gains.
//!
//! ```text
//! Heating ──(temp ≥ target)──► Cooling ──(temp ≤ target)──► Calculating
//!    │                            │                              │
//!    └──────── timeout / fault ───┴──────────► Error ◄───────────┤
//!                                                                ▼
//!                                                            Complete
//! ```

use heapless::Vec;
use kiln_protocol::{ErrorText, TuningMode, TuningResult, TuningStage, TuningStatus};

use super::fit::{calculate_pid_parameters, Sample};
use super::TuningError;
use crate::config::KilnConfig;

/// Samples kept in memory; older data is decimated when full
pub const MAX_SAMPLES: usize = 1024;

/// Tuning session state machine
pub struct Tuner {
    mode: TuningMode,
    target: f32,
    max_temp: f32,
    timeout_ms: u64,
    divisor: f32,
    stage: TuningStage,
    start_ms: Option<u64>,
    last_ms: u64,
    last_temp: f32,
    output: f32,
    samples: Vec<Sample, MAX_SAMPLES>,
    /// Record one sample every `stride` updates
    stride: u32,
    skipped: u32,
    result: Option<TuningResult>,
    error: Option<TuningError>,
}

impl Tuner {
    /// Create a session for `mode`, optionally overriding its target
    pub fn new(
        mode: TuningMode,
        max_temp: Option<f32>,
        config: &KilnConfig,
    ) -> Result<Self, TuningError> {
        let settings = config.tuning.mode(mode);
        let target = max_temp.unwrap_or(settings.target_c);
        if !target.is_finite() || target <= 0.0 || target > config.safety.max_temp_c {
            return Err(TuningError::InvalidTarget);
        }

        Ok(Self {
            mode,
            target,
            max_temp: config.safety.max_temp_c,
            timeout_ms: settings.timeout_s as u64 * 1000,
            divisor: config.tuning.tangent_divisor,
            stage: TuningStage::Heating,
            start_ms: None,
            last_ms: 0,
            last_temp: 0.0,
            output: 100.0,
            samples: Vec::new(),
            stride: 1,
            skipped: 0,
            result: None,
            error: None,
        })
    }

    pub fn stage(&self) -> TuningStage {
        self.stage
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn result(&self) -> Option<TuningResult> {
        self.result
    }

    pub fn error(&self) -> Option<TuningError> {
        self.error
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Whether the session has finished, successfully or not
    pub fn is_finished(&self) -> bool {
        matches!(self.stage, TuningStage::Complete | TuningStage::Error)
    }

    /// Advance one control cycle
    ///
    /// Returns the relay duty to apply and whether tuning continues. Once
    /// `false` is returned the caller must force the relay off.
    pub fn update(&mut self, temp: f32, now_ms: u64) -> (f32, bool) {
        if self.is_finished() {
            return (0.0, false);
        }

        let start = *self.start_ms.get_or_insert(now_ms);
        self.last_ms = now_ms;
        self.last_temp = temp;

        if now_ms.saturating_sub(start) > self.timeout_ms {
            self.fail(TuningError::Timeout);
            return (0.0, false);
        }
        if temp > self.max_temp {
            self.fail(TuningError::OverTemperature);
            return (0.0, false);
        }

        self.record(now_ms.saturating_sub(start), temp);

        match self.stage {
            TuningStage::Heating if temp >= self.target => {
                self.stage = TuningStage::Cooling;
                self.output = 0.0;
            }
            TuningStage::Heating => self.output = 100.0,
            TuningStage::Cooling if temp <= self.target => {
                self.stage = TuningStage::Calculating;
                self.output = 0.0;
                self.calculate();
                return (0.0, false);
            }
            _ => self.output = 0.0,
        }

        (self.output, true)
    }

    /// End the session with an error
    pub fn fail(&mut self, error: TuningError) {
        self.stage = TuningStage::Error;
        self.error = Some(error);
        self.output = 0.0;
    }

    /// Abort on operator request
    pub fn cancel(&mut self) {
        if !self.is_finished() {
            self.fail(TuningError::Cancelled);
        }
    }

    fn calculate(&mut self) {
        match calculate_pid_parameters(&self.samples, self.divisor) {
            Ok(result) => {
                self.result = Some(result);
                self.stage = TuningStage::Complete;
            }
            Err(error) => self.fail(error),
        }
    }

    fn record(&mut self, elapsed_ms: u64, temp: f32) {
        self.skipped += 1;
        if self.skipped < self.stride {
            return;
        }
        self.skipped = 0;

        if self.samples.is_full() {
            self.decimate();
        }
        let _ = self.samples.push((elapsed_ms as f32 / 1000.0, temp));
    }

    /// Keep every other sample and halve the recording rate
    fn decimate(&mut self) {
        let mut write = 0;
        for read in (0..self.samples.len()).step_by(2) {
            self.samples[write] = self.samples[read];
            write += 1;
        }
        self.samples.truncate(write);
        self.stride = self.stride.saturating_mul(2);
    }

    /// Snapshot for the status channel
    pub fn status(&self) -> TuningStatus {
        let elapsed_ms = self
            .start_ms
            .map_or(0, |start| self.last_ms.saturating_sub(start));
        TuningStatus {
            timestamp_ms: self.last_ms,
            stage: self.stage,
            mode: self.mode,
            target_temp: self.target,
            current_temp: self.last_temp,
            output_percent: self.output,
            elapsed_s: (elapsed_ms / 1000) as u32,
            sample_count: self.samples.len() as u16,
            result: self.result,
            error: self.error.map(|e| e.text()),
        }
    }
}

impl TuningError {
    /// Error rendered for the status message
    pub fn text(&self) -> ErrorText {
        let mut text = ErrorText::new();
        // Every message fits the buffer
        let _ = core::fmt::write(&mut text, format_args!("tuning failed: {}", self));
        text
    }
}
