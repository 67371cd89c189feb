//! Host link transmit task
//!
//! Frames every queued status and writes it to the host.

use defmt::*;
use embassy_rp::uart::BufferedUartTx;
use embedded_io_async::Write;

use kiln_protocol::{Message, MAX_FRAME_SIZE};

use crate::channels::Channels;

/// Host link TX task - sends status frames
#[embassy_executor::task]
pub async fn link_tx_task(mut tx: BufferedUartTx, channels: &'static Channels) {
    info!("Link TX task started");

    let mut seq: u8 = 0;
    let mut buf = [0u8; MAX_FRAME_SIZE];

    loop {
        let status = channels.next_status().await;

        let frame = match Message::Status(status).to_frame(seq) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to frame status: {}", e);
                continue;
            }
        };
        seq = seq.wrapping_add(1);

        match frame.encode(&mut buf) {
            Ok(len) => {
                if let Err(e) = tx.write_all(&buf[..len]).await {
                    warn!("Failed to send status: {:?}", e);
                }
            }
            Err(e) => {
                warn!("Failed to encode frame: {}", e);
            }
        }
    }
}
