//! Closed-loop temperature control

pub mod gains;
pub mod pid;

pub use gains::{ContinuousSchedule, GainSchedule, Scheduler, TableSchedule};
pub use pid::{Pid, PidGains, PidTerms};
