//! Hardware abstraction traits
//!
//! These traits define the interface between the control logic
//! and board-specific implementations.

pub mod heater;
pub mod watchdog;

pub use heater::{RelayError, RelayOutput, SensorError, TemperatureSensor};
pub use watchdog::Watchdog;
