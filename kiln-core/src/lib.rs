//! Board-agnostic core logic for the kiln controller firmware
//!
//! This crate contains all application logic that does not depend on
//! specific hardware implementations:
//!
//! - Hardware abstraction traits (thermocouple, relay, watchdog)
//! - Lifecycle state machine
//! - Firing profiles and the schedule controller
//! - PID control with gain scheduling
//! - Step-response tuning
//! - Sensor fault guard
//! - Configuration types, validation and TOML loading
//! - Cross-context channels and the control cycle

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

#[macro_use]
mod fmt;

pub mod channel;
pub mod config;
pub mod control;
pub mod cycle;
pub mod safety;
pub mod schedule;
pub mod state;
pub mod traits;
pub mod tuning;
