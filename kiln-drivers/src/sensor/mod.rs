//! Temperature sensor implementations

pub mod max31855;

pub use max31855::{Max31855, Reading};
