//! Controller configuration
//!
//! Typed settings with shipped defaults, read from a single TOML document
//! that also carries the firing profiles.

pub mod loader;
pub mod profiles;
pub mod toml;
pub mod types;

pub use profiles::TomlProfiles;
pub use toml::{TomlError, TomlErrorKind};
pub use types::*;
