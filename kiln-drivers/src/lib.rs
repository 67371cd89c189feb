//! Hardware driver implementations
//!
//! Concrete implementations of the traits defined in kiln-core, written
//! against `embedded-hal` 1.0:
//!
//! - Solid-state relay output (time-proportional, staggered multi-pin)
//! - MAX31855 thermocouple amplifier

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

#[macro_use]
mod fmt;

pub mod relay;
pub mod sensor;

pub use relay::SsrController;
pub use sensor::Max31855;
