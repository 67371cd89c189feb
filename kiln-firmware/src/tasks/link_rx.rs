//! Host link receive task
//!
//! Parses framed commands from the host and queues them for the control
//! loop. Status publication stays quiet until the host's first Ping.

use defmt::*;
use embassy_rp::uart::BufferedUartRx;
use embassy_time::{Duration, Timer};
use embedded_io_async::Read;

use kiln_protocol::{Command, FrameParser, Message};

use crate::channels::Channels;

/// Buffer size for UART receive
const RX_BUF_SIZE: usize = 64;

/// Attempts to queue one command before it is dropped
const SEND_ATTEMPTS: u32 = 20;

/// Pause between queue attempts
const SEND_RETRY: Duration = Duration::from_millis(50);

/// Host link RX task - receives and parses command frames
#[embassy_executor::task]
pub async fn link_rx_task(
    mut rx: BufferedUartRx,
    channels: &'static Channels,
    ready_timeout: Duration,
) {
    info!("Link RX task started");

    while !channels.ready().wait(ready_timeout).await {
        warn!("Control loop not ready after {} ms", ready_timeout.as_millis());
    }
    info!("Control loop ready, accepting commands");

    let mut parser = FrameParser::new();
    let mut buf = [0u8; RX_BUF_SIZE];

    loop {
        match rx.read(&mut buf).await {
            Ok(n) if n > 0 => {
                trace!("RX: {} bytes", n);

                for &byte in &buf[..n] {
                    match parser.feed(byte) {
                        Ok(Some(frame)) => match Message::from_frame(&frame) {
                            Ok(Message::Command(cmd)) => handle_command(channels, cmd).await,
                            Ok(Message::Status(_)) => {
                                warn!("Ignoring status frame from host");
                            }
                            Err(e) => {
                                warn!("Failed to decode message: {}", e);
                            }
                        },
                        Ok(None) => {}
                        Err(e) => {
                            warn!("Frame parse error: {}", e);
                        }
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!("UART read error: {:?}", e);
            }
        }
    }
}

/// Queue a command for core 1, retrying while the queue is full
async fn handle_command(channels: &Channels, cmd: Command) {
    if cmd == Command::Ping && channels.quiet().is_quiet() {
        info!("Host link up, status publication enabled");
        channels.quiet().set(false);
    }

    debug!("Command: {}", cmd.label());
    for _ in 0..SEND_ATTEMPTS {
        if channels.send_command(cmd.clone()).is_ok() {
            return;
        }
        Timer::after(SEND_RETRY).await;
    }
    warn!("Command queue full, dropped {}", cmd.label());
}
