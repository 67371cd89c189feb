//! Latest-status cache and publication throttle

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use kiln_protocol::{KilnState, StatusMessage};

/// Most recent status, readable by any number of consumers
///
/// Reading does not consume anything, so display, logger and link tasks
/// never compete for queue items.
pub struct StatusCache<M: RawMutex> {
    latest: Mutex<M, RefCell<Option<StatusMessage>>>,
}

impl<M: RawMutex> Default for StatusCache<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex> StatusCache<M> {
    pub const fn new() -> Self {
        Self {
            latest: Mutex::new(RefCell::new(None)),
        }
    }

    pub fn store(&self, status: StatusMessage) {
        self.latest.lock(|cell| *cell.borrow_mut() = Some(status));
    }

    /// Copy of the latest status
    pub fn latest(&self) -> Option<StatusMessage> {
        self.latest.lock(|cell| cell.borrow().clone())
    }

    /// Inspect the latest status without copying it
    pub fn with<R>(&self, f: impl FnOnce(Option<&StatusMessage>) -> R) -> R {
        self.latest.lock(|cell| f(cell.borrow().as_ref()))
    }
}

/// Rate limit for periodic status publication
///
/// Publishes at most once per interval. A lifecycle change or an explicit
/// [`StatusThrottle::force`] publishes on the next check regardless.
#[derive(Debug, Clone)]
pub struct StatusThrottle {
    interval_ms: u64,
    last_ms: Option<u64>,
    last_state: Option<KilnState>,
    forced: bool,
}

impl StatusThrottle {
    pub fn new(interval_ms: u32) -> Self {
        Self {
            interval_ms: interval_ms as u64,
            last_ms: None,
            last_state: None,
            forced: false,
        }
    }

    /// Publish on the next check (e.g. after a Ping)
    pub fn force(&mut self) {
        self.forced = true;
    }

    /// Whether a status for `state` should go out at `now_ms`
    ///
    /// Returning `true` records the publication.
    pub fn should_publish(&mut self, now_ms: u64, state: KilnState) -> bool {
        let due = match self.last_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.interval_ms,
        };
        let changed = self.last_state != Some(state);

        if due || changed || self.forced {
            self.last_ms = Some(now_ms);
            self.last_state = Some(state);
            self.forced = false;
            true
        } else {
            false
        }
    }
}
