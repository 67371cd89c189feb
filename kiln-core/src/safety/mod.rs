//! Safety monitoring
//!
//! Detects sensor fault conditions before readings reach the controller.

pub mod monitor;

pub use monitor::{Reading, SensorGuard};
