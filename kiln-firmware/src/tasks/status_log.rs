//! Status log task
//!
//! Reads the latest snapshot from the cache once per period and logs it.
//! The cache is never consumed, so this does not compete with the link.

use defmt::*;
use embassy_time::{Duration, Ticker};

use kiln_protocol::StatusMessage;

use crate::channels::Channels;

#[embassy_executor::task]
pub async fn status_log_task(channels: &'static Channels, period: Duration) {
    let mut ticker = Ticker::every(period);
    let mut last_ms: Option<u64> = None;

    loop {
        ticker.next().await;

        channels.cache().with(|status| {
            let Some(status) = status else {
                return;
            };
            if last_ms == Some(status.timestamp_ms()) {
                return;
            }
            last_ms = Some(status.timestamp_ms());

            match status {
                StatusMessage::Firing(s) => {
                    info!(
                        "[{}] {} {}C -> {}C out {}% step {}/{} rate {} adapt {}",
                        s.timestamp_ms,
                        s.state,
                        s.current_temp,
                        s.target_temp,
                        s.output_percent,
                        s.step_index,
                        s.total_steps,
                        s.current_rate,
                        s.adaptation_count
                    );
                    if let Some(err) = &s.error {
                        error!("Kiln error: {}", err.as_str());
                    }
                }
                StatusMessage::Tuning(s) => {
                    info!(
                        "[{}] tuning {} {}C -> {}C out {}% samples {}",
                        s.timestamp_ms,
                        s.stage,
                        s.current_temp,
                        s.target_temp,
                        s.output_percent,
                        s.sample_count
                    );
                    if let Some(result) = &s.result {
                        info!(
                            "Tuning result: Kp {} Ki {} Kd {} (L {}s, T {}s)",
                            result.kp, result.ki, result.kd, result.dead_time_s, result.time_constant_s
                        );
                    }
                }
            }
        });
    }
}
