//! Firing schedules
//!
//! Profiles, the rate history used to measure the kiln, and the controller
//! that turns both into a target temperature every cycle.

pub mod controller;
pub mod profile;
pub mod rate;

pub use controller::{CommandError, FiringController, ResumePoint};
pub use profile::{Profile, ProfileError, ProfileStore, Step, MAX_STEPS};
pub use rate::{RateHistory, RATE_HISTORY_LEN};
