//! Cross-core channels
//!
//! The only state core 0 and core 1 share. Constructed once in `main` and
//! handed to each side as a shared reference. `CriticalSectionRawMutex` on
//! the RP2040 takes a hardware spinlock, so it is safe across both cores.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use kiln_core::channel::KilnChannels;
use static_cell::StaticCell;

pub type Channels = KilnChannels<CriticalSectionRawMutex>;

static CHANNELS: StaticCell<Channels> = StaticCell::new();

/// Build the channels; panics if called twice
pub fn init() -> &'static Channels {
    CHANNELS.init(Channels::new())
}
