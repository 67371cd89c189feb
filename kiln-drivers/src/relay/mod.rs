//! Heater relay outputs

mod ssr;

pub use ssr::{SsrController, MAX_RELAY_PINS};
