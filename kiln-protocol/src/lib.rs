//! Kiln controller message protocol
//!
//! This crate defines the values that cross between the control context
//! (which owns the thermocouple and relays) and everything else: commands
//! flowing toward the controller and status snapshots flowing away from it.
//! The same types are carried over the host UART link, postcard-encoded
//! inside a small binary frame:
//!
//! ```text
//! ┌───────┬──────┬─────┬────────┬─────────────┬───────┐
//! │ START │ TYPE │ SEQ │ LENGTH │ PAYLOAD     │ CRC-8 │
//! │ 1B    │ 1B   │ 1B  │ 1B     │ 0–250B      │ 1B    │
//! └───────┴──────┴─────┴────────┴─────────────┴───────┘
//! ```
//!
//! Messages are plain values: every field is owned, so a message can be
//! copied into a queue and the sender keeps nothing that aliases it.

#![no_std]
#![deny(unsafe_code)]

pub mod frame;
pub mod messages;

pub use frame::{crc8, Frame, FrameError, FrameParser, FRAME_START, MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE};
pub use messages::{
    Command, ErrorText, FiringStatus, KilnState, Message, PidStatus, ProfileName, ResumeRequest,
    StatusMessage, StepKind, StepName, TuningMode, TuningResult, TuningStage, TuningStatus,
};
