//! Thermocouple fault guard
//!
//! Isolated faults (a noisy SPI transfer, a single open-circuit flag) are
//! ridden out by reusing the last good reading. A run of consecutive
//! faults beyond the configured limit is escalated to a fatal error.
//!
//! A finite reading above the safety maximum is never substituted, even
//! when it lies outside the sensor's plausible range.

use crate::config::SafetyConfig;
use crate::traits::SensorError;

/// Outcome of checking one sensor read
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reading {
    /// Valid measurement
    Good(f32),
    /// Finite reading above the safety maximum, passed through unchanged
    OverTemperature(f32),
    /// Fault tolerated; last good reading substituted
    Substituted {
        temp: f32,
        error: SensorError,
        consecutive: u8,
    },
    /// Fault tolerated, but no good reading exists yet; relays stay off
    Unavailable(SensorError),
    /// Fault limit exceeded
    Fatal(SensorError),
}

impl Reading {
    /// Temperature to control with, if any
    pub fn temperature(&self) -> Option<f32> {
        match *self {
            Reading::Good(temp)
            | Reading::OverTemperature(temp)
            | Reading::Substituted { temp, .. } => Some(temp),
            Reading::Unavailable(_) | Reading::Fatal(_) => None,
        }
    }
}

/// Consecutive-fault counter with last-good substitution
#[derive(Debug, Clone)]
pub struct SensorGuard {
    max_temp_c: f32,
    min_c: f32,
    max_c: f32,
    limit: u8,
    consecutive: u8,
    last_good: Option<f32>,
}

impl SensorGuard {
    pub fn new(config: &SafetyConfig) -> Self {
        Self {
            max_temp_c: config.max_temp_c,
            min_c: config.sensor_min_c,
            max_c: config.sensor_max_c,
            limit: config.sensor_fault_limit,
            consecutive: 0,
            last_good: None,
        }
    }

    /// Classify one raw read
    pub fn check(&mut self, raw: Result<f32, SensorError>) -> Reading {
        if let Ok(temp) = raw {
            if temp.is_finite() && temp > self.max_temp_c {
                return Reading::OverTemperature(temp);
            }
        }

        let raw = raw.and_then(|temp| {
            if temp.is_finite() && temp >= self.min_c && temp <= self.max_c {
                Ok(temp)
            } else {
                Err(SensorError::OutOfRange)
            }
        });

        match raw {
            Ok(temp) => {
                self.consecutive = 0;
                self.last_good = Some(temp);
                Reading::Good(temp)
            }
            Err(error) => {
                self.consecutive = self.consecutive.saturating_add(1);
                if self.consecutive > self.limit {
                    return Reading::Fatal(error);
                }
                match self.last_good {
                    Some(temp) => Reading::Substituted {
                        temp,
                        error,
                        consecutive: self.consecutive,
                    },
                    None => Reading::Unavailable(error),
                }
            }
        }
    }

    /// Consecutive faults seen so far
    pub fn consecutive_faults(&self) -> u8 {
        self.consecutive
    }

    pub fn last_good(&self) -> Option<f32> {
        self.last_good
    }

    /// Forget fault history, e.g. when a new run starts
    pub fn reset(&mut self) {
        self.consecutive = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> SensorGuard {
        SensorGuard::new(&SafetyConfig::default())
    }

    #[test]
    fn test_good_reading_passes() {
        let mut g = guard();
        assert_eq!(g.check(Ok(250.0)), Reading::Good(250.0));
        assert_eq!(g.last_good(), Some(250.0));
    }

    #[test]
    fn test_fault_substitutes_last_good() {
        let mut g = guard();
        g.check(Ok(500.0));
        assert_eq!(
            g.check(Err(SensorError::OpenCircuit)),
            Reading::Substituted {
                temp: 500.0,
                error: SensorError::OpenCircuit,
                consecutive: 1
            }
        );
    }

    #[test]
    fn test_out_of_range_is_fault() {
        let mut g = guard();
        g.check(Ok(500.0));
        let reading = g.check(Ok(-50.0));
        assert!(matches!(
            reading,
            Reading::Substituted {
                error: SensorError::OutOfRange,
                ..
            }
        ));
        assert!(matches!(g.check(Ok(f32::NAN)), Reading::Substituted { .. }));
        assert!(matches!(
            g.check(Ok(f32::INFINITY)),
            Reading::Substituted { .. }
        ));
    }

    #[test]
    fn test_above_max_temp_never_substituted() {
        let mut g = guard();
        g.check(Ok(1250.0));

        // Beyond the sensor range as well as the safety maximum
        assert_eq!(g.check(Ok(2000.0)), Reading::OverTemperature(2000.0));
        assert_eq!(g.check(Ok(1310.0)).temperature(), Some(1310.0));
        assert_eq!(g.last_good(), Some(1250.0));
        assert_eq!(g.consecutive_faults(), 0);
    }

    #[test]
    fn test_no_good_reading_yet() {
        let mut g = guard();
        assert_eq!(
            g.check(Err(SensorError::NoReading)),
            Reading::Unavailable(SensorError::NoReading)
        );
        assert_eq!(g.check(Err(SensorError::NoReading)).temperature(), None);
    }

    #[test]
    fn test_limit_escalates() {
        let mut g = guard();
        g.check(Ok(300.0));
        for _ in 0..10 {
            assert!(matches!(
                g.check(Err(SensorError::Bus)),
                Reading::Substituted { .. }
            ));
        }
        assert_eq!(
            g.check(Err(SensorError::ShortToVcc)),
            Reading::Fatal(SensorError::ShortToVcc)
        );
    }

    #[test]
    fn test_good_reading_resets_count() {
        let mut g = guard();
        g.check(Ok(300.0));
        for _ in 0..9 {
            g.check(Err(SensorError::Bus));
        }
        g.check(Ok(301.0));
        assert_eq!(g.consecutive_faults(), 0);
        for _ in 0..10 {
            assert!(g.check(Err(SensorError::Bus)).temperature().is_some());
        }
    }
}
