//! Firing-schedule controller
//!
//! Executes a profile step by step against live temperature. Each update
//! runs, in order:
//!
//! 1. Over-temperature check (every state, cannot be bypassed)
//! 2. Rate history sampling
//! 3. Recovery hold, if resuming after a temperature loss
//! 4. Step completion
//! 5. Runaway check
//! 6. Adaptive rate control (heating ramps only)
//! 7. Target temperature for the current step
//!
//! A step never completes during the update that entered it, so repeated
//! updates at the same instant and temperature change nothing.

use core::fmt::Write;

use kiln_protocol::{ErrorText, FiringStatus, KilnState, PidStatus, ResumeRequest, StepName};

use super::profile::{Profile, ProfileError, Step};
use super::rate::RateHistory;
use crate::config::{AdaptationConfig, KilnConfig, RecoveryConfig, SafetyConfig};
use crate::state::{Event, FaultKind, State};
use crate::tuning::TuningError;

const MS_PER_HOUR: f32 = 3_600_000.0;

/// Reasons a command is refused
///
/// A refused command is logged and ignored; the controller state is not
/// changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandError {
    /// A firing or tuning session is already active
    Busy(KilnState),
    /// A fault is latched; stop first
    Faulted,
    /// The profile could not be loaded
    Profile(ProfileError),
    /// The tuning session could not be created
    Tuning(TuningError),
    /// Resume point lies outside the profile
    InvalidResume,
    /// No valid temperature has been read yet
    NoReading,
}

impl core::fmt::Display for CommandError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CommandError::Busy(state) => write!(f, "busy ({:?})", state),
            CommandError::Faulted => write!(f, "fault latched; stop first"),
            CommandError::Profile(err) => write!(f, "{}", err),
            CommandError::Tuning(err) => write!(f, "{}", err),
            CommandError::InvalidResume => write!(f, "resume point outside profile"),
            CommandError::NoReading => write!(f, "no temperature reading yet"),
        }
    }
}

/// Where an interrupted run left off
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResumePoint {
    /// Schedule time already elapsed (s)
    pub elapsed_s: u32,
    /// Adapted rate in effect before the interruption (°C/h)
    pub current_rate: Option<f32>,
    /// Last temperature written to the run log (°C)
    pub last_logged_temp: Option<f32>,
    /// Temperature now (°C)
    pub current_temp: Option<f32>,
    /// Step index from the run log
    pub step_index: Option<usize>,
}

impl From<&ResumeRequest> for ResumePoint {
    fn from(req: &ResumeRequest) -> Self {
        Self {
            elapsed_s: req.elapsed_s,
            current_rate: req.current_rate,
            last_logged_temp: req.last_logged_temp,
            current_temp: req.current_temp,
            step_index: req.step_index.map(usize::from),
        }
    }
}

/// Active recovery hold
#[derive(Debug, Clone, Copy, PartialEq)]
struct Recovery {
    target: f32,
    start_ms: u64,
}

/// Firing-schedule state machine
pub struct FiringController {
    safety: SafetyConfig,
    adaptation: AdaptationConfig,
    recovery_config: RecoveryConfig,

    state: State,
    profile: Option<Profile>,
    step_index: usize,
    /// When the current step was entered
    step_entered_ms: u64,
    /// Ramp reference point; moved by adaptation and recovery
    step_start_ms: u64,
    step_start_temp: f32,
    /// Whether the current ramp moves downward
    descending: bool,
    current_rate: Option<f32>,
    adaptation_count: u16,
    last_adaptation_ms: Option<u64>,
    last_check_ms: u64,
    last_sample_ms: Option<u64>,
    history: RateHistory,
    recovery: Option<Recovery>,
    /// Run clock origin, shifted forward by recovery holds
    run_start_ms: u64,
    /// Schedule time already elapsed before a resume
    resumed_elapsed_ms: u64,
    /// Elapsed time frozen when the run ends
    final_elapsed_ms: Option<u64>,
    runaway_armed: bool,
    pid_reset_pending: bool,
    error: Option<ErrorText>,
    last_target: f32,
}

impl FiringController {
    pub fn new(config: &KilnConfig) -> Self {
        Self {
            safety: config.safety,
            adaptation: config.adaptation,
            recovery_config: config.recovery,
            state: State::Idle,
            profile: None,
            step_index: 0,
            step_entered_ms: 0,
            step_start_ms: 0,
            step_start_temp: 0.0,
            descending: false,
            current_rate: None,
            adaptation_count: 0,
            last_adaptation_ms: None,
            last_check_ms: 0,
            last_sample_ms: None,
            history: RateHistory::new(),
            recovery: None,
            run_start_ms: 0,
            resumed_elapsed_ms: 0,
            final_elapsed_ms: None,
            runaway_armed: false,
            pid_reset_pending: false,
            error: None,
            last_target: 0.0,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    pub fn step_index(&self) -> usize {
        self.step_index
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.profile.as_ref()?.step(self.step_index)
    }

    pub fn current_rate(&self) -> Option<f32> {
        self.current_rate
    }

    pub fn adaptation_count(&self) -> u16 {
        self.adaptation_count
    }

    pub fn recovery_target(&self) -> Option<f32> {
        self.recovery.map(|r| r.target)
    }

    pub fn is_recovering(&self) -> bool {
        self.recovery.is_some()
    }

    pub fn error(&self) -> Option<&ErrorText> {
        self.error.as_ref()
    }

    /// Target returned by the last update
    pub fn last_target(&self) -> f32 {
        self.last_target
    }

    /// Consume the PID reset request raised by an adaptation
    pub fn take_pid_reset(&mut self) -> bool {
        core::mem::take(&mut self.pid_reset_pending)
    }

    /// Check whether a new session may start
    pub fn can_start(&self) -> Result<(), CommandError> {
        match self.state {
            State::Idle | State::Complete => Ok(()),
            State::Error(_) => Err(CommandError::Faulted),
            other => Err(CommandError::Busy(other.into())),
        }
    }

    fn begin(&mut self, profile: Profile, now_ms: u64, resumed_elapsed_ms: u64) {
        self.profile = Some(profile);
        self.run_start_ms = now_ms;
        self.resumed_elapsed_ms = resumed_elapsed_ms;
        self.final_elapsed_ms = None;
        self.adaptation_count = 0;
        self.recovery = None;
        self.error = None;
        self.pid_reset_pending = false;
        self.last_sample_ms = None;
        self.history.clear();
        self.last_target = 0.0;
        self.step_entered_ms = now_ms;
    }

    /// Start `profile` from its first step
    pub fn run(&mut self, profile: Profile, now_ms: u64, current_temp: f32) -> Result<(), CommandError> {
        self.can_start()?;
        if profile.is_empty() {
            return Err(CommandError::Profile(ProfileError::Empty));
        }

        info!("run: {} steps", profile.len());
        self.begin(profile, now_ms, 0);
        self.enter_step(0, now_ms, current_temp);
        self.state = self.state.transition(Event::Run);
        self.last_target = self.target_temp(now_ms);
        Ok(())
    }

    /// Continue `profile` from a logged position
    ///
    /// The step and in-step time come from `point.step_index` when given,
    /// otherwise from replaying the profile's nominal timing up to
    /// `point.elapsed_s`. If the kiln has lost more than the recovery
    /// threshold since the last log entry and the step is not descending,
    /// the controller first holds at the logged temperature.
    pub fn resume(
        &mut self,
        profile: Profile,
        now_ms: u64,
        point: ResumePoint,
    ) -> Result<(), CommandError> {
        self.can_start()?;
        if profile.is_empty() {
            return Err(CommandError::Profile(ProfileError::Empty));
        }

        let (index, in_step_s) = match point.step_index {
            Some(index) if index < profile.len() => {
                let start_s = nominal_step_start(&profile, index, self.recovery_config.ambient_temp_c);
                (index, (point.elapsed_s as f32 - start_s).max(0.0))
            }
            Some(_) => return Err(CommandError::InvalidResume),
            None => locate(&profile, point.elapsed_s as f32, self.recovery_config.ambient_temp_c),
        };

        let step = *profile.step(index).ok_or(CommandError::InvalidResume)?;
        let nominal_start = nominal_start_temp(&profile, index, self.recovery_config.ambient_temp_c);
        let temp = point
            .current_temp
            .or(point.last_logged_temp)
            .unwrap_or(nominal_start);

        self.begin(profile, now_ms, point.elapsed_s as u64 * 1000);

        let lost = match (point.last_logged_temp, point.current_temp) {
            (Some(logged), Some(current)) => logged - current,
            _ => 0.0,
        };
        let descending = step.is_descending(nominal_start);
        let recovering = lost > self.recovery_config.threshold_c && !descending;

        self.enter_step(index, now_ms, temp);
        self.descending = descending;

        match step {
            Step::Hold { .. } | Step::Cooling { .. } => {
                // Keep the time already spent in the step
                self.step_start_ms = now_ms.saturating_sub((in_step_s * 1000.0) as u64);
            }
            Step::Ramp { .. } => {
                if let Some(rate) = point.current_rate.filter(|r| r.is_finite() && *r > 0.0) {
                    self.current_rate = Some(rate);
                }
                if recovering {
                    if let Some(logged) = point.last_logged_temp {
                        self.step_start_temp = logged;
                    }
                }
            }
        }

        if recovering {
            if let Some(logged) = point.last_logged_temp {
                warn!("resume: kiln lost {} C, recovering to {} C", lost, logged);
                self.recovery = Some(Recovery {
                    target: logged,
                    start_ms: now_ms,
                });
            }
        }

        info!("resume: step {} after {} s", index, point.elapsed_s);
        self.state = self.state.transition(Event::Resume);
        self.last_target = self.target_temp(now_ms);
        Ok(())
    }

    /// Enter the tuning state
    pub fn start_tuning(&mut self) -> Result<(), CommandError> {
        self.can_start()?;
        self.profile = None;
        self.error = None;
        self.recovery = None;
        self.state = self.state.transition(Event::StartTuning);
        Ok(())
    }

    /// Leave the tuning state
    pub fn finish_tuning(&mut self) {
        self.state = self.state.transition(Event::TuningFinished);
    }

    /// Abort whatever is active; always succeeds
    pub fn stop(&mut self, now_ms: u64) {
        self.freeze_elapsed(now_ms);
        self.state = self.state.transition(Event::Stop);
        self.recovery = None;
        self.error = None;
        self.pid_reset_pending = false;
        self.last_target = 0.0;
    }

    /// Latch a fatal fault with a human-readable message
    pub fn fault(&mut self, kind: FaultKind, message: ErrorText, now_ms: u64) {
        if self.state.is_error() {
            return;
        }
        error!("fault: {}", kind.as_str());
        self.freeze_elapsed(now_ms);
        self.state = self.state.transition(Event::Fault(kind));
        self.error = Some(message);
        self.recovery = None;
        self.last_target = 0.0;
    }

    fn freeze_elapsed(&mut self, now_ms: u64) {
        if self.state == State::Running {
            self.final_elapsed_ms = Some(self.running_elapsed_ms(now_ms));
        }
    }

    fn running_elapsed_ms(&self, now_ms: u64) -> u64 {
        let paused = self
            .recovery
            .map_or(0, |r| now_ms.saturating_sub(r.start_ms));
        (self.resumed_elapsed_ms + now_ms.saturating_sub(self.run_start_ms)).saturating_sub(paused)
    }

    /// Schedule time elapsed, excluding recovery holds
    pub fn elapsed_ms(&self, now_ms: u64) -> u64 {
        match (self.state, self.final_elapsed_ms) {
            (State::Running, _) => self.running_elapsed_ms(now_ms),
            (_, Some(frozen)) => frozen,
            _ => 0,
        }
    }

    fn enter_step(&mut self, index: usize, now_ms: u64, temp: f32) {
        let Some(step) = self.profile.as_ref().and_then(|p| p.step(index)).copied() else {
            return;
        };
        self.step_index = index;
        self.step_entered_ms = now_ms;
        self.step_start_ms = now_ms;
        self.step_start_temp = temp;
        self.descending = step.is_descending(temp);
        self.current_rate = step.rate();
        self.last_adaptation_ms = None;
        self.last_check_ms = now_ms;
        self.runaway_armed = false;
        self.history.clear();
        debug!("entering step {}", index);
    }

    /// Target for the current step at `now_ms`
    pub fn target_temp(&self, now_ms: u64) -> f32 {
        if self.state != State::Running {
            return 0.0;
        }
        if let Some(recovery) = self.recovery {
            return recovery.target;
        }
        let Some(step) = self.current_step() else {
            return 0.0;
        };

        match *step {
            Step::Hold { target, .. } => target,
            Step::Cooling { .. } => 0.0,
            Step::Ramp { target, .. } => match self.current_rate {
                Some(rate) if rate > 0.0 => {
                    let hours = now_ms.saturating_sub(self.step_start_ms) as f32 / MS_PER_HOUR;
                    let travel = rate * hours;
                    if self.descending {
                        (self.step_start_temp - travel).max(target)
                    } else {
                        (self.step_start_temp + travel).min(target)
                    }
                }
                _ => target,
            },
        }
    }

    /// Run one control cycle and return the target temperature
    ///
    /// `relay_output` is the duty currently applied, used to decide
    /// whether the kiln is already at full power.
    pub fn update(&mut self, now_ms: u64, current_temp: f32, relay_output: f32) -> f32 {
        if current_temp > self.safety.max_temp_c {
            if !self.state.is_error() {
                let mut text = ErrorText::new();
                let _ = write!(
                    text,
                    "over temperature: {:.1} C > {:.1} C",
                    current_temp, self.safety.max_temp_c
                );
                self.fault(FaultKind::OverTemperature, text, now_ms);
            }
            self.last_target = 0.0;
            return 0.0;
        }

        if self.state != State::Running {
            self.last_target = 0.0;
            return 0.0;
        }

        self.sample(now_ms, current_temp);

        if let Some(recovery) = self.recovery {
            if current_temp >= recovery.target - self.recovery_config.tolerance_c {
                self.end_recovery(now_ms, recovery);
            } else {
                self.last_target = recovery.target;
                return recovery.target;
            }
        }

        if now_ms > self.step_entered_ms && self.step_complete(now_ms, current_temp) {
            let next = self.step_index + 1;
            let len = self.profile.as_ref().map_or(0, Profile::len);
            if next >= len {
                info!("schedule complete");
                self.freeze_elapsed(now_ms);
                self.state = self.state.transition(Event::ScheduleFinished);
                self.last_target = 0.0;
                return 0.0;
            }
            self.enter_step(next, now_ms, current_temp);
        }

        let target = self.target_temp(now_ms);

        if self.runaway(target, current_temp) {
            let mut text = ErrorText::new();
            let _ = write!(
                text,
                "runaway: {:.1} C above target {:.1} C",
                current_temp - target,
                target
            );
            self.fault(FaultKind::TemperatureRunaway, text, now_ms);
            return 0.0;
        }

        if self.adapt(now_ms, current_temp, relay_output, target).is_err() {
            return 0.0;
        }

        let target = self.target_temp(now_ms);
        self.last_target = target;
        target
    }

    fn sample(&mut self, now_ms: u64, temp: f32) {
        let interval_ms = self.adaptation.sample_interval_s as u64 * 1000;
        let due = self
            .last_sample_ms
            .map_or(true, |last| now_ms.saturating_sub(last) >= interval_ms);
        if due {
            self.history.record(now_ms, temp);
            self.last_sample_ms = Some(now_ms);
        }
    }

    fn end_recovery(&mut self, now_ms: u64, recovery: Recovery) {
        let lost_ms = now_ms.saturating_sub(recovery.start_ms);
        info!("recovery complete after {} s", lost_ms / 1000);
        self.recovery = None;
        // Shift the clocks so the schedule resumes as if no time was lost
        self.run_start_ms = self.run_start_ms.saturating_add(lost_ms);
        self.step_start_ms = self.step_start_ms.saturating_add(lost_ms);
        self.step_entered_ms = self.step_entered_ms.saturating_add(lost_ms).min(now_ms);
        self.last_check_ms = now_ms;
        self.history.clear();
    }

    fn step_complete(&self, now_ms: u64, temp: f32) -> bool {
        let Some(step) = self.current_step() else {
            return false;
        };
        match *step {
            Step::Hold { duration_s, .. } => {
                now_ms.saturating_sub(self.step_start_ms) >= duration_s as u64 * 1000
            }
            Step::Ramp { target, .. } => {
                if self.descending {
                    temp <= target
                } else {
                    temp >= target
                }
            }
            Step::Cooling { target, .. } => target.is_some_and(|t| temp <= t),
        }
    }

    /// Stuck-on relay signature: far above target while heating or holding
    fn runaway(&mut self, target: f32, temp: f32) -> bool {
        let applies = match self.current_step() {
            Some(Step::Ramp { .. }) => !self.descending,
            Some(Step::Hold { .. }) => true,
            _ => false,
        };
        if !applies {
            return false;
        }
        let excess = temp - target;
        if excess <= self.safety.max_temp_error_c {
            // Only armed once the kiln has been inside the band, so a hold
            // entered from above is not mistaken for a runaway
            self.runaway_armed = true;
            return false;
        }
        self.runaway_armed
    }

    /// Slow the ramp when the kiln cannot keep pace
    fn adapt(&mut self, now_ms: u64, temp: f32, output: f32, target: f32) -> Result<(), ()> {
        let Some(step) = self.current_step().copied() else {
            return Ok(());
        };
        let (Step::Ramp { min_rate, .. }, false) = (step, self.descending) else {
            return Ok(());
        };
        let Some(rate) = self.current_rate else {
            return Ok(());
        };

        let a = self.adaptation;
        if now_ms.saturating_sub(self.last_check_ms) < a.check_interval_s as u64 * 1000 {
            return Ok(());
        }
        self.last_check_ms = now_ms;

        if now_ms.saturating_sub(self.step_entered_ms) < a.min_step_time_s as u64 * 1000 {
            return Ok(());
        }
        let spaced = self
            .last_adaptation_ms
            .map_or(true, |last| now_ms.saturating_sub(last) >= a.min_spacing_s as u64 * 1000);
        if !spaced || output < a.saturation_percent {
            return Ok(());
        }

        let Some(measured) = self.history.rate_per_hour(now_ms, a.rate_window_s) else {
            return Ok(());
        };
        if measured >= a.rate_threshold * rate || target - temp <= a.error_threshold_c {
            return Ok(());
        }

        let proposed = measured * a.reduction_factor;
        let acceptable = match min_rate {
            Some(min) => proposed >= min,
            None => proposed > 0.0,
        };

        if !acceptable {
            let mut text = ErrorText::new();
            let _ = write!(
                text,
                "kiln too slow: {:.0} C/h, step needs {:.0} C/h",
                measured,
                min_rate.unwrap_or(0.0)
            );
            self.fault(FaultKind::ScheduleViolation, text, now_ms);
            return Err(());
        }

        warn!("adapting rate {} -> {} C/h", rate, proposed);
        self.current_rate = Some(proposed);
        self.step_start_ms = now_ms;
        self.step_start_temp = temp;
        self.history.clear();
        self.last_sample_ms = None;
        self.pid_reset_pending = true;
        self.adaptation_count = self.adaptation_count.saturating_add(1);
        self.last_adaptation_ms = Some(now_ms);
        Ok(())
    }

    /// Snapshot for the status channel
    pub fn status(
        &self,
        now_ms: u64,
        current_temp: f32,
        output_percent: f32,
        relay_on: bool,
        pid: PidStatus,
    ) -> FiringStatus {
        let step = self.current_step();
        let active = self.profile.is_some() && self.state != State::Idle;
        FiringStatus {
            timestamp_ms: now_ms,
            state: self.state.into(),
            current_temp,
            target_temp: self.last_target,
            output_percent,
            relay_on,
            elapsed_s: (self.elapsed_ms(now_ms) / 1000) as u32,
            profile: self.profile.as_ref().filter(|_| active).map(|p| p.name().clone()),
            error: self.error.clone(),
            step_index: step.filter(|_| active).map(|_| self.step_index as u8),
            step_name: self
                .profile
                .as_ref()
                .filter(|_| active)
                .and_then(|p| p.label(self.step_index))
                .cloned()
                .unwrap_or_else(StepName::new),
            step_kind: step.filter(|_| active).map(Step::kind),
            total_steps: self.profile.as_ref().filter(|_| active).map_or(0, |p| p.len() as u8),
            desired_rate: step.filter(|_| active).and_then(Step::rate),
            current_rate: self.current_rate.filter(|_| active),
            actual_rate: self
                .history
                .rate_per_hour(now_ms, self.adaptation.rate_window_s)
                .filter(|_| active),
            adaptation_count: self.adaptation_count,
            recovering: self.recovery.is_some(),
            recovery_target: self.recovery_target(),
            pid,
        }
    }
}

/// Nominal start temperature of step `index`
fn nominal_start_temp(profile: &Profile, index: usize, ambient: f32) -> f32 {
    profile.steps()[..index]
        .iter()
        .fold(ambient, |temp, step| step.target().unwrap_or(temp))
}

/// Nominal schedule time at which step `index` starts (s)
fn nominal_step_start(profile: &Profile, index: usize, ambient: f32) -> f32 {
    let mut temp = ambient;
    let mut start = 0.0;
    for step in &profile.steps()[..index] {
        start += step.nominal_duration_s(temp).unwrap_or(0.0);
        temp = step.target().unwrap_or(temp);
    }
    start
}

/// Replay nominal timing to find the step and in-step time at `elapsed_s`
fn locate(profile: &Profile, elapsed_s: f32, ambient: f32) -> (usize, f32) {
    let mut temp = ambient;
    let mut remaining = elapsed_s;
    let last = profile.len().saturating_sub(1);

    for (index, step) in profile.steps().iter().enumerate() {
        match step.nominal_duration_s(temp) {
            Some(duration) if remaining >= duration && index < last => {
                remaining -= duration;
                temp = step.target().unwrap_or(temp);
            }
            // Steps without a nominal length cannot be replayed past
            _ => return (index, remaining),
        }
    }
    (last, remaining)
}
