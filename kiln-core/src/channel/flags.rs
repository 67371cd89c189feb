//! Startup and publication flags shared between contexts

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration};

/// One-shot "hardware initialized" flag with a bounded async wait
pub struct ReadyFlag<M: RawMutex> {
    ready: AtomicBool,
    signal: Signal<M, ()>,
}

impl<M: RawMutex> Default for ReadyFlag<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex> ReadyFlag<M> {
    pub const fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            signal: Signal::new(),
        }
    }

    /// Mark the control context as up
    pub fn set(&self) {
        self.ready.store(true, Ordering::Release);
        self.signal.signal(());
    }

    pub fn is_set(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Wait until the flag is set or `timeout` passes
    ///
    /// Returns whether the flag was set.
    pub async fn wait(&self, timeout: Duration) -> bool {
        if self.is_set() {
            return true;
        }
        let waited = with_timeout(timeout, async {
            while !self.is_set() {
                self.signal.wait().await;
            }
        })
        .await;
        waited.is_ok()
    }
}

/// Suppresses status publication while set
///
/// Hardware control is unaffected; only the status queue is skipped.
pub struct QuietMode {
    quiet: AtomicBool,
}

impl Default for QuietMode {
    fn default() -> Self {
        Self::new()
    }
}

impl QuietMode {
    pub const fn new() -> Self {
        Self {
            quiet: AtomicBool::new(false),
        }
    }

    pub fn set(&self, quiet: bool) {
        self.quiet.store(quiet, Ordering::Relaxed);
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

    #[test]
    fn test_ready_already_set() {
        let flag: ReadyFlag<CriticalSectionRawMutex> = ReadyFlag::new();
        flag.set();
        assert!(flag.is_set());
        assert!(block_on(flag.wait(Duration::from_millis(1))));
    }

    #[test]
    fn test_ready_wait_times_out() {
        let flag: ReadyFlag<CriticalSectionRawMutex> = ReadyFlag::new();
        assert!(!block_on(flag.wait(Duration::from_millis(20))));
        assert!(!flag.is_set());
    }

    #[test]
    fn test_ready_set_from_another_thread() {
        static FLAG: ReadyFlag<CriticalSectionRawMutex> = ReadyFlag::new();
        let setter = std::thread::spawn(|| {
            std::thread::sleep(std::time::Duration::from_millis(10));
            FLAG.set();
        });
        assert!(block_on(FLAG.wait(Duration::from_secs(5))));
        setter.join().unwrap();
    }

    #[test]
    fn test_quiet_mode() {
        let quiet = QuietMode::new();
        assert!(!quiet.is_quiet());
        quiet.set(true);
        assert!(quiet.is_quiet());
        quiet.set(false);
        assert!(!quiet.is_quiet());
    }
}
