//! Kiln - Ceramic Kiln Controller Firmware
//!
//! Main firmware binary for RP2040-based kiln controllers.
//!
//! Core 1 owns the thermocouple, the SSRs and the watchdog and runs the
//! control loop. Core 0 runs the embassy executor for the host link and
//! status logging. The two share nothing but the [`channels::Channels`].

#![no_std]
#![no_main]

use defmt::*;
use embassy_executor::Spawner;
use embassy_rp::bind_interrupts;
use embassy_rp::gpio::{Level, Output};
use embassy_rp::multicore::{spawn_core1, Stack};
use embassy_rp::peripherals::UART0;
use embassy_rp::spi::{self, Spi};
use embassy_rp::uart::{BufferedInterruptHandler, Config as UartConfig, Uart};
use embassy_rp::watchdog::Watchdog;
use embassy_time::{Delay, Duration};
use embedded_hal_bus::spi::ExclusiveDevice;
use heapless::Vec;
use static_cell::{ConstStaticCell, StaticCell};
use {defmt_rtt as _, panic_probe as _};

use kiln_core::config::KilnConfig;
use kiln_drivers::relay::MAX_RELAY_PINS;
use kiln_drivers::{Max31855, SsrController};

use crate::control::{park, ControlHardware};

/// Embedded configuration and firing profiles (compiled into firmware)
/// Edit kiln.toml and rebuild to customize; build.rs validates it
const KILN_TOML: &str = include_str!("../kiln.toml");

/// MAX31855 tops out at 5 MHz
const THERMOCOUPLE_SPI_HZ: u32 = 4_000_000;

mod channels;
mod control;
mod tasks;

bind_interrupts!(struct Irqs {
    UART0_IRQ => BufferedInterruptHandler<UART0>;
});

// Static cells for UART buffers (must live forever)
static TX_BUF: StaticCell<[u8; 512]> = StaticCell::new();
static RX_BUF: StaticCell<[u8; 256]> = StaticCell::new();

static CORE1_STACK: ConstStaticCell<Stack<16384>> = ConstStaticCell::new(Stack::new());

/// Main entry point
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Kiln firmware starting...");

    let p = embassy_rp::init(Default::default());

    // Relays are driven low before anything can fail
    // Pin assignments are board-specific (SSR1: GPIO14, SSR2: GPIO15)
    let ssr1 = Output::new(p.PIN_14, Level::Low);
    let ssr2 = Output::new(p.PIN_15, Level::Low);
    info!("Peripherals initialized, relays low");

    let config = match KilnConfig::from_toml(KILN_TOML) {
        Ok(config) => config,
        Err(e) => {
            // build.rs should make this unreachable for syntax errors
            error!("Invalid kiln.toml: {}", e);
            error!("Refusing to arm hardware");
            park();
        }
    };
    info!(
        "Configuration loaded: max {}C, cycle {} ms",
        config.safety.max_temp_c, config.relay.cycle_ms
    );

    let mut pins = Vec::<Output<'static>, MAX_RELAY_PINS>::new();
    if pins.push(ssr1).is_err() || pins.push(ssr2).is_err() {
        error!("Too many relay pins");
        park();
    }
    let relays = match SsrController::new_active_high(pins, Delay, &config.relay) {
        Ok(relays) => relays,
        Err(e) => {
            error!("Relay init failed: {}", e);
            park();
        }
    };

    // Thermocouple on SPI0 (SCK: GPIO18, MISO: GPIO16, CS: GPIO17)
    let mut spi_config = spi::Config::default();
    spi_config.frequency = THERMOCOUPLE_SPI_HZ;
    let bus = Spi::new_blocking_rxonly(p.SPI0, p.PIN_18, p.PIN_16, spi_config);
    let cs = Output::new(p.PIN_17, Level::High);
    let sensor = match ExclusiveDevice::new_no_delay(bus, cs) {
        Ok(device) => Max31855::new(device),
        Err(_) => {
            error!("Thermocouple chip-select init failed");
            park();
        }
    };
    info!("Thermocouple and relays initialized");

    // Host link on UART0 (TX: GPIO0, RX: GPIO1)
    let tx_buf = TX_BUF.init([0u8; 512]);
    let rx_buf = RX_BUF.init([0u8; 256]);
    let uart = Uart::new_blocking(p.UART0, p.PIN_0, p.PIN_1, UartConfig::default());
    let uart = uart.into_buffered(Irqs, tx_buf, rx_buf);
    let (tx, rx) = uart.split();
    info!("UART initialized for host link");

    let ready_timeout = Duration::from_millis(config.timing.ready_timeout_ms as u64);
    let status_period = Duration::from_millis(config.timing.status_interval_ms as u64);

    let channels = channels::init();
    // Nothing is published until the host says hello
    channels.quiet().set(true);

    let hardware = ControlHardware {
        sensor,
        relays,
        watchdog: Watchdog::new(p.WATCHDOG),
    };
    spawn_core1(p.CORE1, CORE1_STACK.take(), move || {
        control::run(config, KILN_TOML, hardware, channels)
    });
    info!("Control loop started on core 1");

    spawner.spawn(tasks::link_rx_task(rx, channels, ready_timeout)).unwrap();
    spawner.spawn(tasks::link_tx_task(tx, channels)).unwrap();
    spawner.spawn(tasks::status_log_task(channels, status_period)).unwrap();

    info!("All tasks spawned, firmware running");

    loop {
        embassy_time::Timer::after_secs(60).await;
        trace!("Main loop heartbeat");
    }
}
