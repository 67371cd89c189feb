//! Embassy async tasks (core 0)
//!
//! None of these own control hardware; they talk to core 1 only through
//! the shared [`crate::channels::Channels`].

pub mod link_rx;
pub mod link_tx;
pub mod status_log;

pub use link_rx::link_rx_task;
pub use link_tx::link_tx_task;
pub use status_log::status_log_task;
