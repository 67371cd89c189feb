//! Control context (core 1)
//!
//! Owns the thermocouple, the relays and the hardware watchdog. Runs the
//! control cycle at a fixed cadence with blocking waits only; nothing on
//! core 0 can delay it.

use defmt::*;
use embassy_rp::gpio::Output;
use embassy_rp::peripherals::SPI0;
use embassy_rp::spi::{Blocking, Spi};
use embassy_rp::watchdog::Watchdog as RpWatchdog;
use embassy_time::{block_for, Delay, Duration, Instant};
use embedded_hal_bus::spi::{ExclusiveDevice, NoDelay};

use kiln_core::config::{KilnConfig, TomlProfiles};
use kiln_core::cycle::{ControlCycle, CycleOutcome};
use kiln_core::traits::Watchdog;
use kiln_drivers::{Max31855, SsrController};

use crate::channels::Channels;

/// Thermocouple amplifier on SPI0 with its own chip-select
pub type Thermocouple = Max31855<ExclusiveDevice<ThermocoupleBus, Output<'static>, NoDelay>>;

type ThermocoupleBus = Spi<'static, SPI0, Blocking>;

/// Heater relays
pub type Relays = SsrController<Output<'static>, Delay>;

/// RP2040 watchdog behind the core trait
pub struct HardwareWatchdog {
    inner: RpWatchdog,
}

impl HardwareWatchdog {
    /// Start the countdown; the board resets unless fed within `timeout`
    pub fn start(mut inner: RpWatchdog, timeout: Duration) -> Self {
        inner.start(timeout);
        Self { inner }
    }

    pub fn stop(&mut self) {
        self.inner.stop();
    }
}

impl Watchdog for HardwareWatchdog {
    fn feed(&mut self) {
        self.inner.feed();
    }
}

/// Everything core 1 needs, moved over from core 0 at spawn time
pub struct ControlHardware {
    pub sensor: Thermocouple,
    pub relays: Relays,
    pub watchdog: RpWatchdog,
}

/// Watchdog timeout as a multiple of the control period
const WATCHDOG_PERIODS: u32 = 4;

/// Core 1 entry point; never returns
pub fn run(
    config: KilnConfig,
    doc: &'static str,
    hw: ControlHardware,
    channels: &'static Channels,
) -> ! {
    let period = Duration::from_millis(config.timing.control_period_ms as u64);
    let watchdog = HardwareWatchdog::start(
        hw.watchdog,
        Duration::from_millis((config.timing.control_period_ms * WATCHDOG_PERIODS) as u64),
    );
    let profiles = TomlProfiles::new(doc, config.safety.sensor_min_c, config.safety.sensor_max_c);

    let mut cycle = ControlCycle::new(
        config,
        hw.sensor,
        hw.relays,
        watchdog,
        profiles,
        Delay,
        channels,
    );

    info!("Control loop running, period {} ms", period.as_millis());
    channels.ready().set();

    loop {
        let started = Instant::now();

        match cycle.run_cycle(started.as_millis()) {
            Ok(CycleOutcome::Continue) => {}
            Ok(CycleOutcome::Shutdown) => break,
            Err(e) => {
                // Watchdog was not fed; a hung relay path ends in a reset
                error!("Control cycle failed: {}", e);
            }
        }

        let elapsed = started.elapsed();
        if elapsed < period {
            block_for(period - elapsed);
        } else {
            warn!("Control cycle overran: {} ms", elapsed.as_millis());
        }
    }

    info!("Control loop shut down, relays off");
    cycle.watchdog_mut().stop();
    park()
}

/// Idle forever
pub fn park() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}
