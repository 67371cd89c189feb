//! Rate history
//!
//! Fixed-capacity ring of (time, temperature) samples from which the
//! controller measures how fast the kiln is actually moving.

use heapless::HistoryBuffer;

/// Samples kept; at the default 10 s interval this covers about 21 minutes
pub const RATE_HISTORY_LEN: usize = 128;

/// Minimum samples in the window for a rate estimate
const MIN_SAMPLES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Sample {
    time_ms: u64,
    temp: f32,
}

/// Circular buffer of temperature samples
pub struct RateHistory {
    samples: HistoryBuffer<Sample, RATE_HISTORY_LEN>,
}

impl Default for RateHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl RateHistory {
    pub const fn new() -> Self {
        Self {
            samples: HistoryBuffer::new(),
        }
    }

    /// Append a sample, overwriting the oldest when full
    pub fn record(&mut self, time_ms: u64, temp: f32) {
        self.samples.write(Sample { time_ms, temp });
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.len() == 0
    }

    /// Most recent sample as (time, temperature)
    pub fn latest(&self) -> Option<(u64, f32)> {
        self.samples.recent().map(|s| (s.time_ms, s.temp))
    }

    /// Least-squares slope of the samples in the last `window_s` seconds
    ///
    /// Returns °C per hour, positive while heating. `None` until at least
    /// two samples spanning a non-zero time fall inside the window.
    pub fn rate_per_hour(&self, now_ms: u64, window_s: u32) -> Option<f32> {
        let cutoff = now_ms.saturating_sub(window_s as u64 * 1000);
        let in_window = || self.samples.oldest_ordered().filter(move |s| s.time_ms >= cutoff);

        let mut count = 0usize;
        let mut origin = None;
        for s in in_window() {
            count += 1;
            origin.get_or_insert(s.time_ms);
        }
        let origin = origin?;
        if count < MIN_SAMPLES {
            return None;
        }

        // Hours relative to the first sample keep f32 precision usable
        let hours = |s: &Sample| (s.time_ms - origin) as f32 / 3_600_000.0;
        let n = count as f32;
        let mean_t = in_window().map(hours).sum::<f32>() / n;
        let mean_y = in_window().map(|s| s.temp).sum::<f32>() / n;

        let mut cov = 0.0f32;
        let mut var = 0.0f32;
        for s in in_window() {
            let dt = hours(s) - mean_t;
            cov += dt * (s.temp - mean_y);
            var += dt * dt;
        }

        if var <= f32::EPSILON * f32::EPSILON {
            return None;
        }
        Some(cov / var)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f32, b: f32, tol: f32) {
        assert!((a - b).abs() <= tol, "{} != {} (tol {})", a, b, tol);
    }

    #[test]
    fn test_empty_has_no_rate() {
        let history = RateHistory::new();
        assert_eq!(history.rate_per_hour(0, 600), None);
        assert!(history.is_empty());
    }

    #[test]
    fn test_single_sample_has_no_rate() {
        let mut history = RateHistory::new();
        history.record(1000, 25.0);
        assert_eq!(history.rate_per_hour(1000, 600), None);
    }

    #[test]
    fn test_linear_heating_rate() {
        let mut history = RateHistory::new();
        // 100 °C/h sampled every 10 s
        for i in 0..60u64 {
            let t = i * 10_000;
            history.record(t, 20.0 + 100.0 * t as f32 / 3_600_000.0);
        }
        let rate = history.rate_per_hour(590_000, 600).unwrap();
        assert_close(rate, 100.0, 0.05);
    }

    #[test]
    fn test_cooling_rate_negative() {
        let mut history = RateHistory::new();
        for i in 0..30u64 {
            history.record(i * 10_000, 800.0 - i as f32 * 0.5);
        }
        // 0.5 °C per 10 s = 180 °C/h
        let rate = history.rate_per_hour(290_000, 600).unwrap();
        assert_close(rate, -180.0, 0.05);
    }

    #[test]
    fn test_window_excludes_old_samples() {
        let mut history = RateHistory::new();
        // Fast first half, flat second half
        for i in 0..60u64 {
            let temp = if i < 30 { i as f32 * 10.0 } else { 290.0 };
            history.record(i * 10_000, temp);
        }
        let recent = history.rate_per_hour(590_000, 200).unwrap();
        assert_close(recent, 0.0, 0.01);
    }

    #[test]
    fn test_wraps_when_full() {
        let mut history = RateHistory::new();
        for i in 0..(RATE_HISTORY_LEN as u64 + 10) {
            history.record(i * 1000, i as f32);
        }
        assert_eq!(history.len(), RATE_HISTORY_LEN);
        assert_eq!(history.latest().map(|(t, _)| t), Some((RATE_HISTORY_LEN as u64 + 9) * 1000));
    }

    #[test]
    fn test_clear() {
        let mut history = RateHistory::new();
        history.record(0, 10.0);
        history.record(10_000, 20.0);
        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.rate_per_hour(10_000, 600), None);
    }
}
