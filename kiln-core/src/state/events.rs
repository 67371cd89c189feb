//! Events that trigger lifecycle transitions

use super::machine::FaultKind;

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    // Command events
    /// Start a profile from its first step
    Run,
    /// Continue a profile from a logged position
    Resume,
    /// Begin a tuning session
    StartTuning,
    /// Abort any session
    Stop,
    /// Abort and end the control loop
    Shutdown,

    // Session events
    /// Last schedule step completed
    ScheduleFinished,
    /// Tuning session ended (complete, failed or cancelled)
    TuningFinished,

    // Safety events
    /// Fatal fault detected
    Fault(FaultKind),
}

impl Event {
    /// Check if this event originates from an operator command
    pub fn is_command_event(&self) -> bool {
        matches!(
            self,
            Event::Run | Event::Resume | Event::StartTuning | Event::Stop | Event::Shutdown
        )
    }

    /// Check if this event indicates a fault
    pub fn is_fault_event(&self) -> bool {
        matches!(self, Event::Fault(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_events() {
        assert!(Event::Run.is_command_event());
        assert!(Event::Shutdown.is_command_event());
        assert!(!Event::ScheduleFinished.is_command_event());
        assert!(!Event::Fault(FaultKind::SensorFault).is_command_event());
    }

    #[test]
    fn test_fault_events() {
        assert!(Event::Fault(FaultKind::OverTemperature).is_fault_event());
        assert!(!Event::Stop.is_fault_event());
    }
}
