//! Lifecycle state machine
//!
//! Relay behavior is a function of the current state: only `Running` and
//! `Tuning` may energize the heating elements.

use kiln_protocol::KilnState;

use super::events::Event;

/// Controller lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// No run active, relays off
    Idle,
    /// Firing schedule executing
    Running,
    /// Step-response tuning in progress
    Tuning,
    /// Last step finished
    Complete,
    /// Fault latched; outputs disabled until stopped
    Error(FaultKind),
}

/// Fatal fault categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FaultKind {
    /// Too many consecutive thermocouple faults
    SensorFault,
    /// Temperature above the configured maximum
    OverTemperature,
    /// Temperature far above target while heating (stuck relay)
    TemperatureRunaway,
    /// Kiln cannot hold a step's minimum rate
    ScheduleViolation,
    /// Profile could not be loaded
    ProfileLoad,
    /// Relay hardware failure
    RelayFault,
}

impl FaultKind {
    /// Short description for status text
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::SensorFault => "sensor fault",
            FaultKind::OverTemperature => "over temperature",
            FaultKind::TemperatureRunaway => "temperature runaway",
            FaultKind::ScheduleViolation => "schedule violation",
            FaultKind::ProfileLoad => "profile load failed",
            FaultKind::RelayFault => "relay fault",
        }
    }
}

impl core::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl State {
    /// Check if this state may energize the relays
    pub fn heater_allowed(&self) -> bool {
        matches!(self, State::Running | State::Tuning)
    }

    /// Check if a firing or tuning session is active
    pub fn is_busy(&self) -> bool {
        matches!(self, State::Running | State::Tuning)
    }

    /// Check if this is an error state
    pub fn is_error(&self) -> bool {
        matches!(self, State::Error(_))
    }

    /// Process an event and return the next state
    ///
    /// Events that do not apply leave the state unchanged; callers compare
    /// the result to detect a rejected command.
    pub fn transition(self, event: Event) -> Self {
        use Event::*;
        use State::*;

        match (self, event) {
            // Stop always succeeds
            (_, Stop) | (_, Shutdown) => Idle,

            // The first fault wins; later ones do not overwrite it
            (Error(kind), Fault(_)) => Error(kind),
            (_, Fault(kind)) => Error(kind),

            (Idle | Complete, Run) | (Idle | Complete, Resume) => Running,
            (Idle | Complete, StartTuning) => Tuning,

            (Running, ScheduleFinished) => Complete,
            (Tuning, TuningFinished) => Idle,

            _ => self,
        }
    }
}

impl From<State> for KilnState {
    fn from(state: State) -> Self {
        match state {
            State::Idle => KilnState::Idle,
            State::Running => KilnState::Running,
            State::Tuning => KilnState::Tuning,
            State::Complete => KilnState::Complete,
            State::Error(_) => KilnState::Error,
        }
    }
}
