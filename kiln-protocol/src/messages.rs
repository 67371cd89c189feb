//! Command and status messages
//!
//! Commands flow toward the control context; status snapshots flow away
//! from it. Both directions share [`Message`] for the host link.

use heapless::String;
use serde::{Deserialize, Serialize};

use crate::frame::{Frame, FrameError, MAX_PAYLOAD_SIZE};

/// Message type ID: command (host → controller)
pub const MSG_COMMAND: u8 = 0x01;
/// Message type ID: status (controller → host)
pub const MSG_STATUS: u8 = 0x10;

/// Maximum profile name length
pub const MAX_PROFILE_NAME_LEN: usize = 24;
/// Maximum step label length
pub const MAX_STEP_NAME_LEN: usize = 16;
/// Maximum fault message length
pub const MAX_ERROR_LEN: usize = 64;

/// Profile name as understood by the profile loader
pub type ProfileName = String<MAX_PROFILE_NAME_LEN>;
/// Human-readable step label
pub type StepName = String<MAX_STEP_NAME_LEN>;
/// Human-readable fault description
pub type ErrorText = String<MAX_ERROR_LEN>;

/// Lifecycle of the controller as seen from outside
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KilnState {
    /// No run active, relays off
    Idle,
    /// Executing a firing schedule
    Running,
    /// Step-response tuning in progress
    Tuning,
    /// Schedule finished; relays off
    Complete,
    /// Fault latched; relays off until an explicit stop
    Error,
}

/// Step variant tag, reported in status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StepKind {
    Ramp,
    Hold,
    Cooling,
}

/// Tuning intensity
///
/// Each mode maps to a target temperature and a session timeout in the
/// controller configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TuningMode {
    /// Low target, short session
    Safe,
    /// Mid-range target
    Standard,
    /// High target, long session
    Thorough,
}

/// Stage of a tuning session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TuningStage {
    /// Relay at 100% until the target is reached
    Heating,
    /// Relay at 0% until the temperature falls back to the target
    Cooling,
    /// Fitting the step-response model
    Calculating,
    /// Gains available
    Complete,
    /// Session failed; see the error text
    Error,
}

/// Parameters for resuming an interrupted firing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ResumeRequest {
    /// Profile to resume
    pub profile: ProfileName,
    /// Schedule time already elapsed before the interruption (seconds)
    pub elapsed_s: u32,
    /// Adapted ramp rate in effect before the interruption (°C/h)
    pub current_rate: Option<f32>,
    /// Last temperature written to the run log (°C)
    pub last_logged_temp: Option<f32>,
    /// Temperature right now (°C)
    pub current_temp: Option<f32>,
    /// Step index recorded in the run log
    pub step_index: Option<u8>,
}

/// Commands accepted by the control context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// Load a profile by name and start firing it
    RunProfile { profile: ProfileName },
    /// Load a profile and continue it from a logged position
    ResumeProfile(ResumeRequest),
    /// Abort whatever is active; relays off
    Stop,
    /// Stop and end the control loop
    Shutdown,
    /// Begin an open-loop tuning session
    StartTuning {
        mode: TuningMode,
        max_temp: Option<f32>,
    },
    /// Abort the tuning session
    StopTuning,
    /// Request an immediate status publication
    Ping,
}

impl Command {
    /// Short label for logs
    pub fn label(&self) -> &'static str {
        match self {
            Command::RunProfile { .. } => "run",
            Command::ResumeProfile(_) => "resume",
            Command::Stop => "stop",
            Command::Shutdown => "shutdown",
            Command::StartTuning { .. } => "start-tuning",
            Command::StopTuning => "stop-tuning",
            Command::Ping => "ping",
        }
    }
}

/// PID gains and the contribution of each term in the last update
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PidStatus {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    pub p_term: f32,
    pub i_term: f32,
    pub d_term: f32,
}

/// Periodic snapshot of a firing run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FiringStatus {
    /// Controller uptime when the snapshot was taken (ms)
    pub timestamp_ms: u64,
    pub state: KilnState,
    pub current_temp: f32,
    pub target_temp: f32,
    /// Locked relay duty for the current relay cycle (%)
    pub output_percent: f32,
    pub relay_on: bool,
    /// Schedule time elapsed, excluding recovery holds (s)
    pub elapsed_s: u32,
    pub profile: Option<ProfileName>,
    pub error: Option<ErrorText>,
    pub step_index: Option<u8>,
    pub step_name: StepName,
    pub step_kind: Option<StepKind>,
    pub total_steps: u8,
    /// Rate requested by the profile (°C/h)
    pub desired_rate: Option<f32>,
    /// Rate currently commanded after adaptation (°C/h)
    pub current_rate: Option<f32>,
    /// Rate measured over the rate window (°C/h)
    pub actual_rate: Option<f32>,
    pub adaptation_count: u16,
    pub recovering: bool,
    pub recovery_target: Option<f32>,
    pub pid: PidStatus,
}

/// Fitted first-order-plus-dead-time model and derived gains
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TuningResult {
    /// Dead time L (s)
    pub dead_time_s: f32,
    /// Time constant T (s)
    pub time_constant_s: f32,
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

/// Periodic snapshot of a tuning session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TuningStatus {
    pub timestamp_ms: u64,
    pub stage: TuningStage,
    pub mode: TuningMode,
    pub target_temp: f32,
    pub current_temp: f32,
    pub output_percent: f32,
    pub elapsed_s: u32,
    pub sample_count: u16,
    pub result: Option<TuningResult>,
    pub error: Option<ErrorText>,
}

/// Status published by the control context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StatusMessage {
    Firing(FiringStatus),
    Tuning(TuningStatus),
}

impl StatusMessage {
    /// Uptime at which the snapshot was taken
    pub fn timestamp_ms(&self) -> u64 {
        match self {
            StatusMessage::Firing(s) => s.timestamp_ms,
            StatusMessage::Tuning(s) => s.timestamp_ms,
        }
    }

    /// Lifecycle state implied by the snapshot
    pub fn state(&self) -> KilnState {
        match self {
            StatusMessage::Firing(s) => s.state,
            StatusMessage::Tuning(_) => KilnState::Tuning,
        }
    }
}

/// Any message carried over the host link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Message {
    Command(Command),
    Status(StatusMessage),
}

impl Message {
    /// Encode this message into a frame
    pub fn to_frame(&self, seq: u8) -> Result<Frame, FrameError> {
        let mut buf = [0u8; MAX_PAYLOAD_SIZE];
        let (msg_type, used) = match self {
            Message::Command(cmd) => (MSG_COMMAND, postcard::to_slice(cmd, &mut buf)),
            Message::Status(status) => (MSG_STATUS, postcard::to_slice(status, &mut buf)),
        };
        let used = used.map_err(|e| match e {
            postcard::Error::SerializeBufferFull => FrameError::PayloadTooLarge,
            _ => FrameError::Encode,
        })?;
        Frame::new(msg_type, seq, used)
    }

    /// Decode a message from a frame
    pub fn from_frame(frame: &Frame) -> Result<Self, FrameError> {
        match frame.msg_type {
            MSG_COMMAND => postcard::from_bytes(&frame.payload)
                .map(Message::Command)
                .map_err(|_| FrameError::Decode),
            MSG_STATUS => postcard::from_bytes(&frame.payload)
                .map(Message::Status)
                .map_err(|_| FrameError::Decode),
            other => Err(FrameError::UnknownType(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameParser;

    fn name(s: &str) -> ProfileName {
        ProfileName::try_from(s).unwrap()
    }

    fn long_error() -> ErrorText {
        let mut text = ErrorText::new();
        while text.push('x').is_ok() {}
        text
    }

    fn full_status() -> FiringStatus {
        FiringStatus {
            timestamp_ms: 86_400_000,
            state: KilnState::Running,
            current_temp: 1012.25,
            target_temp: 1020.0,
            output_percent: 97.5,
            relay_on: true,
            elapsed_s: 36_000,
            profile: Some(name("cone6-glaze-slow-cool")),
            error: Some(long_error()),
            step_index: Some(3),
            step_name: StepName::try_from("final ramp").unwrap(),
            step_kind: Some(StepKind::Ramp),
            total_steps: 8,
            desired_rate: Some(150.0),
            current_rate: Some(121.5),
            actual_rate: Some(118.0),
            adaptation_count: 2,
            recovering: false,
            recovery_target: None,
            pid: PidStatus {
                kp: 12.0,
                ki: 0.2,
                kd: 180.0,
                p_term: 93.0,
                i_term: 4.0,
                d_term: 0.5,
            },
        }
    }

    #[test]
    fn test_command_over_frame() {
        let msg = Message::Command(Command::ResumeProfile(ResumeRequest {
            profile: name("bisque"),
            elapsed_s: 5400,
            current_rate: Some(80.0),
            last_logged_temp: Some(512.0),
            current_temp: Some(430.0),
            step_index: Some(1),
        }));

        let frame = msg.to_frame(9).unwrap();
        assert_eq!(frame.msg_type, MSG_COMMAND);
        assert_eq!(Message::from_frame(&frame).unwrap(), msg);
    }

    #[test]
    fn test_largest_status_fits_one_frame() {
        let msg = Message::Status(StatusMessage::Firing(full_status()));
        let frame = msg.to_frame(0).unwrap();
        assert!(frame.payload.len() <= MAX_PAYLOAD_SIZE);

        let bytes = frame.encode_to_vec().unwrap();
        let mut parser = FrameParser::new();
        let (parsed, _) = parser.feed_bytes(&bytes).unwrap();
        assert_eq!(Message::from_frame(&parsed.unwrap()).unwrap(), msg);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let frame = Frame::new(0x55, 0, &[]).unwrap();
        assert_eq!(
            Message::from_frame(&frame),
            Err(FrameError::UnknownType(0x55))
        );
    }

    #[test]
    fn test_truncated_body_rejected() {
        let frame = Message::Command(Command::RunProfile {
            profile: name("glaze"),
        })
        .to_frame(1)
        .unwrap();
        let short = Frame::new(frame.msg_type, frame.seq, &frame.payload[..2]).unwrap();
        assert_eq!(Message::from_frame(&short), Err(FrameError::Decode));
    }

    #[test]
    fn test_status_accessors() {
        let firing = StatusMessage::Firing(full_status());
        assert_eq!(firing.state(), KilnState::Running);
        assert_eq!(firing.timestamp_ms(), 86_400_000);

        let tuning = StatusMessage::Tuning(TuningStatus {
            timestamp_ms: 5,
            stage: TuningStage::Heating,
            mode: TuningMode::Safe,
            target_temp: 100.0,
            current_temp: 25.0,
            output_percent: 100.0,
            elapsed_s: 0,
            sample_count: 1,
            result: None,
            error: None,
        });
        assert_eq!(tuning.state(), KilnState::Tuning);
    }
}
