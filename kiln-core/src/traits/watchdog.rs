//! Hardware watchdog

/// A watchdog that resets the board unless fed periodically
pub trait Watchdog {
    /// Restart the watchdog countdown
    fn feed(&mut self);
}
