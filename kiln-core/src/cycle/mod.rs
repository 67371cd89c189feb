//! Control cycle orchestrator
//!
//! One call to [`ControlCycle::run_cycle`] is one iteration of the control
//! context:
//!
//! 1. Read the thermocouple through the fault guard; readings above the
//!    safety maximum reach the controller unchanged
//! 2. Apply pending commands
//! 3. Run the firing controller, or the tuner while tuning
//! 4. Drive the relay, sub-stepped within the control period; forced off
//!    as soon as heating is no longer allowed
//! 5. Publish status (throttled)
//! 6. Feed the watchdog, only if nothing above failed

use core::fmt::Write;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal::delay::DelayNs;
use kiln_protocol::{Command, ErrorText, KilnState, ResumeRequest, StatusMessage, TuningMode};

use crate::channel::{KilnChannels, StatusThrottle};
use crate::config::KilnConfig;
use crate::control::{GainSchedule, Pid, PidGains, Scheduler};
use crate::safety::{Reading, SensorGuard};
use crate::schedule::{CommandError, FiringController, Profile, ProfileError, ProfileStore, ResumePoint};
use crate::state::{FaultKind, State};
use crate::traits::{RelayError, RelayOutput, TemperatureSensor, Watchdog};
use crate::tuning::{Tuner, TuningError};

/// Whether the control loop keeps going
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CycleOutcome {
    Continue,
    /// Shutdown requested; relays are off
    Shutdown,
}

/// Hardware failure that skips the watchdog feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CycleError {
    Relay(RelayError),
}

impl From<RelayError> for CycleError {
    fn from(err: RelayError) -> Self {
        CycleError::Relay(err)
    }
}

impl core::fmt::Display for CycleError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CycleError::Relay(err) => write!(f, "relay: {}", err),
        }
    }
}

/// The control context's owned hardware and logic
pub struct ControlCycle<'a, S, R, W, P, D, M>
where
    M: RawMutex,
{
    config: KilnConfig,
    sensor: S,
    relay: R,
    watchdog: W,
    profiles: P,
    delay: D,
    channels: &'a KilnChannels<M>,
    guard: SensorGuard,
    controller: FiringController,
    pid: Pid,
    scheduler: Scheduler,
    /// Active tuning session
    tuner: Option<Tuner>,
    throttle: StatusThrottle,
    /// Relay sub-steps per control period
    substeps: u32,
}

impl<'a, S, R, W, P, D, M> ControlCycle<'a, S, R, W, P, D, M>
where
    S: TemperatureSensor,
    R: RelayOutput,
    W: Watchdog,
    P: ProfileStore,
    D: DelayNs,
    M: RawMutex,
{
    /// Assemble the control context from validated configuration
    pub fn new(
        config: KilnConfig,
        sensor: S,
        relay: R,
        watchdog: W,
        profiles: P,
        delay: D,
        channels: &'a KilnChannels<M>,
    ) -> Self {
        let substeps = (config.timing.control_period_ms / config.timing.relay_period_ms).max(1);
        Self {
            guard: SensorGuard::new(&config.safety),
            controller: FiringController::new(&config),
            pid: Pid::from_config(&config.pid),
            scheduler: Scheduler::from_config(&config.pid, &config.gain_schedule),
            tuner: None,
            throttle: StatusThrottle::new(config.timing.status_interval_ms),
            substeps,
            config,
            sensor,
            relay,
            watchdog,
            profiles,
            delay,
            channels,
        }
    }

    pub fn state(&self) -> State {
        self.controller.state()
    }

    pub fn controller(&self) -> &FiringController {
        &self.controller
    }

    pub fn pid(&self) -> &Pid {
        &self.pid
    }

    pub fn relay(&self) -> &R {
        &self.relay
    }

    /// The watchdog, e.g. to stop it once the loop has shut down
    pub fn watchdog_mut(&mut self) -> &mut W {
        &mut self.watchdog
    }

    /// Gains the scheduler would apply at `temp`
    pub fn gains_at(&self, temp: f32) -> PidGains {
        self.scheduler.gains_at(temp)
    }

    /// Run one control iteration starting at `now_ms`
    pub fn run_cycle(&mut self, now_ms: u64) -> Result<CycleOutcome, CycleError> {
        let state_before = self.controller.state();
        let temp = self.read_temperature(now_ms);

        let mut shutdown = false;
        while let Ok(command) = self.channels.try_command() {
            if self.handle_command(command, now_ms, temp) {
                shutdown = true;
            }
        }

        let output = match temp {
            Some(temp) if !shutdown => self.control(now_ms, temp),
            _ => 0.0,
        };

        // The relay keeps its locked duty until the cycle ends; cut it now
        let state = self.controller.state();
        let heating_ended = state_before.heater_allowed() && !state.heater_allowed();
        if heating_ended || state.is_error() || shutdown {
            self.relay.force_off()?;
        }
        self.relay
            .set_output(if state.heater_allowed() { output } else { 0.0 });
        self.drive_relay(now_ms)?;

        if state != state_before {
            self.throttle.force();
        }
        self.publish(now_ms, temp);

        self.watchdog.feed();
        if shutdown {
            info!("shutdown complete");
            return Ok(CycleOutcome::Shutdown);
        }
        Ok(CycleOutcome::Continue)
    }

    fn read_temperature(&mut self, now_ms: u64) -> Option<f32> {
        match self.guard.check(self.sensor.read_celsius()) {
            Reading::Good(temp) => Some(temp),
            Reading::OverTemperature(temp) => {
                error!("thermocouple reads {} C, above the safety limit", temp);
                Some(temp)
            }
            Reading::Substituted {
                temp,
                error,
                consecutive,
            } => {
                warn!("sensor fault {} ({} in a row), using last good", error, consecutive);
                Some(temp)
            }
            Reading::Unavailable(error) => {
                warn!("sensor fault {}, no reading yet", error);
                None
            }
            Reading::Fatal(error) => {
                let mut text = ErrorText::new();
                let _ = write!(text, "thermocouple: {}", error);
                if let Some(tuner) = self.tuner.as_mut() {
                    tuner.fail(TuningError::SensorFault);
                }
                self.end_tuning();
                self.controller.fault(FaultKind::SensorFault, text, now_ms);
                None
            }
        }
    }

    /// Returns whether the command requested shutdown
    fn handle_command(&mut self, command: Command, now_ms: u64, temp: Option<f32>) -> bool {
        let label = command.label();
        debug!("command: {}", label);
        let result = match command {
            Command::RunProfile { profile } => self.start_profile(&profile, now_ms, temp),
            Command::ResumeProfile(request) => self.resume_profile(&request, now_ms, temp),
            Command::Stop => {
                self.stop(now_ms);
                Ok(())
            }
            Command::Shutdown => {
                self.stop(now_ms);
                return true;
            }
            Command::StartTuning { mode, max_temp } => self.start_tuning(mode, max_temp),
            Command::StopTuning => {
                if let Some(tuner) = self.tuner.as_mut() {
                    tuner.cancel();
                }
                self.end_tuning();
                Ok(())
            }
            Command::Ping => {
                self.throttle.force();
                Ok(())
            }
        };

        if let Err(err) = result {
            warn!("{} rejected: {}", label, err);
        }
        false
    }

    fn start_profile(&mut self, name: &str, now_ms: u64, temp: Option<f32>) -> Result<(), CommandError> {
        self.controller.can_start()?;
        let temp = temp.ok_or(CommandError::NoReading)?;
        let profile = self.load_profile(name, now_ms)?;
        self.controller.run(profile, now_ms, temp)?;
        self.pid.reset();
        self.guard.reset();
        Ok(())
    }

    fn resume_profile(
        &mut self,
        request: &ResumeRequest,
        now_ms: u64,
        temp: Option<f32>,
    ) -> Result<(), CommandError> {
        self.controller.can_start()?;
        let mut point = ResumePoint::from(request);
        point.current_temp = point.current_temp.or(temp);
        if point.current_temp.is_none() {
            return Err(CommandError::NoReading);
        }
        let profile = self.load_profile(&request.profile, now_ms)?;
        self.controller.resume(profile, now_ms, point)?;
        self.pid.reset();
        self.guard.reset();
        Ok(())
    }

    /// Load with bounded, linearly growing backoff
    ///
    /// A profile that still fails after every attempt latches a fault.
    fn load_profile(&mut self, name: &str, now_ms: u64) -> Result<Profile, CommandError> {
        let attempts = self.config.retry.profile_load_attempts.max(1);
        let mut last_err = ProfileError::Unavailable;

        for attempt in 1..=attempts {
            match self.profiles.load(name) {
                Ok(profile) => return Ok(profile),
                Err(err) => {
                    warn!("profile load attempt {} failed: {}", attempt, err);
                    last_err = err;
                    if attempt < attempts {
                        self.delay
                            .delay_ms(self.config.retry.base_delay_ms.saturating_mul(attempt as u32));
                    }
                }
            }
        }

        let mut text = ErrorText::new();
        let _ = write!(text, "profile '{}': {}", name, last_err);
        self.controller.fault(FaultKind::ProfileLoad, text, now_ms);
        Err(CommandError::Profile(last_err))
    }

    fn start_tuning(&mut self, mode: TuningMode, max_temp: Option<f32>) -> Result<(), CommandError> {
        self.controller.can_start()?;
        let tuner = Tuner::new(mode, max_temp, &self.config).map_err(CommandError::Tuning)?;
        self.controller.start_tuning()?;
        info!("tuning started, target {} C", tuner.target());
        self.tuner = Some(tuner);
        self.pid.reset();
        Ok(())
    }

    fn stop(&mut self, now_ms: u64) {
        if let Some(tuner) = self.tuner.as_mut() {
            tuner.cancel();
        }
        self.end_tuning();
        self.controller.stop(now_ms);
        self.pid.reset();
        self.throttle.force();
    }

    /// Publish the final tuning status and leave the tuning state
    fn end_tuning(&mut self) {
        let Some(tuner) = self.tuner.take() else {
            return;
        };
        self.channels
            .publish_status(StatusMessage::Tuning(tuner.status()));
        if self.controller.state() == State::Tuning {
            self.controller.finish_tuning();
        }
    }

    /// Compute the relay duty for this cycle
    fn control(&mut self, now_ms: u64, temp: f32) -> f32 {
        let target = self
            .controller
            .update(now_ms, temp, self.relay.output());
        if self.controller.take_pid_reset() {
            self.pid.reset();
        }

        match self.controller.state() {
            State::Running => {
                self.pid.apply_gains(self.scheduler.gains_at(temp));
                self.pid.update(target, temp, now_ms)
            }
            State::Tuning => self.tune(now_ms, temp),
            State::Error(kind) => {
                if let Some(tuner) = self.tuner.as_mut() {
                    let err = match kind {
                        FaultKind::OverTemperature => TuningError::OverTemperature,
                        FaultKind::SensorFault => TuningError::SensorFault,
                        _ => TuningError::Cancelled,
                    };
                    tuner.fail(err);
                }
                self.end_tuning();
                0.0
            }
            _ => 0.0,
        }
    }

    fn tune(&mut self, now_ms: u64, temp: f32) -> f32 {
        let Some(tuner) = self.tuner.as_mut() else {
            // Tuning state without a session cannot heat
            self.controller.finish_tuning();
            return 0.0;
        };

        let (output, running) = tuner.update(temp, now_ms);
        if running {
            return output;
        }

        if let Some(result) = tuner.result() {
            info!("tuning complete: kp={} ki={} kd={}", result.kp, result.ki, result.kd);
            let gains = PidGains::new(result.kp, result.ki, result.kd);
            self.scheduler.set_base(gains);
            self.pid.apply_gains(gains);
            self.pid.reset();
        } else if let Some(err) = tuner.error() {
            warn!("tuning failed: {}", err);
        }
        self.end_tuning();
        0.0
    }

    /// Sub-step the relay across the control period
    fn drive_relay(&mut self, now_ms: u64) -> Result<(), CycleError> {
        let period = self.config.timing.relay_period_ms;
        for step in 0..self.substeps {
            if let Err(err) = self.relay.update(now_ms + (step * period) as u64) {
                error!("relay update failed: {}", err);
                let mut text = ErrorText::new();
                let _ = write!(text, "relay: {}", err);
                self.controller.fault(FaultKind::RelayFault, text, now_ms);
                // Best effort; the watchdog covers a relay that cannot switch
                let _ = self.relay.force_off();
                return Err(err.into());
            }
            if step + 1 < self.substeps {
                self.delay.delay_ms(period);
            }
        }
        Ok(())
    }

    fn publish(&mut self, now_ms: u64, temp: Option<f32>) {
        let state = KilnState::from(self.controller.state());
        if !self.throttle.should_publish(now_ms, state) {
            return;
        }

        let status = match (&self.tuner, state) {
            (Some(tuner), KilnState::Tuning) => StatusMessage::Tuning(tuner.status()),
            _ => {
                let temp = temp.or(self.guard.last_good()).unwrap_or(0.0);
                StatusMessage::Firing(self.controller.status(
                    now_ms,
                    temp,
                    self.relay.output(),
                    self.relay.is_on(),
                    self.pid.status(),
                ))
            }
        };
        self.channels.publish_status(status);
    }
}

#[cfg(test)]
mod tests;
