//! Solid-state relay output
//!
//! Time-proportional switching of one logical heater that may fan out to
//! several SSR pins. The duty is locked at the start of every cycle, so a
//! request that changes mid-cycle never adds relay transitions.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use heapless::Vec;
use kiln_core::config::RelayConfig;
use kiln_core::traits::{RelayError, RelayOutput};

/// Most SSR pins a single controller drives
pub const MAX_RELAY_PINS: usize = 4;

/// Time-proportional SSR driver
///
/// Pins switch together but not simultaneously: each pin after the first
/// waits `stagger_ms` to spread the inrush current. [`RelayOutput::force_off`]
/// skips the stagger.
pub struct SsrController<P, D> {
    pins: Vec<P, MAX_RELAY_PINS>,
    delay: D,
    /// If true, relay ON = pin LOW
    inverted: bool,
    cycle_ms: u64,
    stagger_ms: u32,
    /// Latest request from the controller
    requested: f32,
    /// Duty in force for the current cycle
    locked: f32,
    cycle_start_ms: Option<u64>,
    on: bool,
}

impl<P: OutputPin, D: DelayNs> SsrController<P, D> {
    /// Create a controller and drive every pin to the off level
    ///
    /// # Arguments
    /// - `pins`: SSR control pins, switched in order
    /// - `delay`: Used for the stagger between pins
    /// - `inverted`: If true, a relay is ON when its pin is LOW
    pub fn new(
        pins: Vec<P, MAX_RELAY_PINS>,
        delay: D,
        config: &RelayConfig,
        inverted: bool,
    ) -> Result<Self, RelayError> {
        if pins.is_empty() {
            return Err(RelayError::NoPins);
        }

        let mut ssr = Self {
            pins,
            delay,
            inverted,
            cycle_ms: config.cycle_ms as u64,
            stagger_ms: config.stagger_ms,
            requested: 0.0,
            locked: 0.0,
            cycle_start_ms: None,
            on: false,
        };
        ssr.force_off()?;
        Ok(ssr)
    }

    pub fn new_active_high(
        pins: Vec<P, MAX_RELAY_PINS>,
        delay: D,
        config: &RelayConfig,
    ) -> Result<Self, RelayError> {
        Self::new(pins, delay, config, false)
    }

    /// Duty most recently requested, which takes effect next cycle
    pub fn requested(&self) -> f32 {
        self.requested
    }

    fn drive(pin: &mut P, on: bool, inverted: bool) -> Result<(), RelayError> {
        let result = if on != inverted {
            pin.set_high()
        } else {
            pin.set_low()
        };
        result.map_err(|_| RelayError::Pin)
    }

    fn switch(&mut self, on: bool) -> Result<(), RelayError> {
        for (i, pin) in self.pins.iter_mut().enumerate() {
            if i > 0 && self.stagger_ms > 0 {
                self.delay.delay_ms(self.stagger_ms);
            }
            Self::drive(pin, on, self.inverted)?;
        }
        self.on = on;
        Ok(())
    }
}

impl<P: OutputPin, D: DelayNs> RelayOutput for SsrController<P, D> {
    fn set_output(&mut self, percent: f32) {
        self.requested = if percent.is_nan() {
            0.0
        } else {
            percent.clamp(0.0, 100.0)
        };
    }

    fn update(&mut self, now_ms: u64) -> Result<(), RelayError> {
        let new_cycle = match self.cycle_start_ms {
            None => true,
            Some(start) => now_ms.saturating_sub(start) >= self.cycle_ms,
        };
        if new_cycle {
            self.cycle_start_ms = Some(now_ms);
            if self.locked != self.requested {
                trace!("ssr duty locked at {}%", self.requested);
            }
            self.locked = self.requested;
        }

        let elapsed = now_ms.saturating_sub(self.cycle_start_ms.unwrap_or(now_ms));
        let on_ms = (self.locked / 100.0 * self.cycle_ms as f32) as u64;
        let want_on = elapsed < on_ms;

        if want_on != self.on {
            self.switch(want_on)?;
        }
        Ok(())
    }

    fn force_off(&mut self) -> Result<(), RelayError> {
        self.requested = 0.0;
        self.locked = 0.0;
        self.cycle_start_ms = None;
        self.on = false;

        // Every pin is attempted even if an earlier one fails
        let mut result = Ok(());
        for pin in self.pins.iter_mut() {
            if let Err(err) = Self::drive(pin, false, self.inverted) {
                result = Err(err);
            }
        }
        if result.is_err() {
            error!("ssr force off: pin write failed");
        }
        result
    }

    fn output(&self) -> f32 {
        self.locked
    }

    fn is_on(&self) -> bool {
        self.on
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;
    use embedded_hal::digital::{ErrorKind, ErrorType};
    use proptest::prelude::*;
    use std::rc::Rc;

    /// Pin that records its level and edges in a shared log
    struct MockPin {
        id: usize,
        high: bool,
        edges: usize,
        fail: bool,
        log: Rc<RefCell<std::vec::Vec<(usize, bool)>>>,
    }

    impl MockPin {
        fn new(id: usize, log: &Rc<RefCell<std::vec::Vec<(usize, bool)>>>) -> Self {
            Self {
                id,
                high: false,
                edges: 0,
                fail: false,
                log: log.clone(),
            }
        }

        fn level(&mut self, high: bool) -> Result<(), ErrorKind> {
            if self.fail {
                return Err(ErrorKind::Other);
            }
            if high != self.high {
                self.edges += 1;
            }
            self.high = high;
            self.log.borrow_mut().push((self.id, high));
            Ok(())
        }
    }

    impl ErrorType for MockPin {
        type Error = ErrorKind;
    }

    impl OutputPin for MockPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.level(false)
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.level(true)
        }
    }

    #[derive(Default)]
    struct MockDelay {
        calls_ms: std::vec::Vec<u32>,
    }

    impl DelayNs for MockDelay {
        fn delay_ns(&mut self, ns: u32) {
            self.calls_ms.push(ns / 1_000_000);
        }

        fn delay_ms(&mut self, ms: u32) {
            self.calls_ms.push(ms);
        }
    }

    fn config() -> RelayConfig {
        RelayConfig {
            cycle_ms: 2000,
            stagger_ms: 10,
        }
    }

    fn single() -> SsrController<MockPin, MockDelay> {
        let log = Rc::new(RefCell::new(std::vec::Vec::new()));
        let mut pins = Vec::new();
        let _ = pins.push(MockPin::new(0, &log));
        SsrController::new_active_high(pins, MockDelay::default(), &config()).unwrap()
    }

    #[test]
    fn test_starts_off() {
        let ssr = single();
        assert!(!ssr.is_on());
        assert!(!ssr.pins[0].high);
        assert_eq!(ssr.output(), 0.0);
    }

    #[test]
    fn test_no_pins_rejected() {
        let pins: Vec<MockPin, MAX_RELAY_PINS> = Vec::new();
        let result = SsrController::new_active_high(pins, MockDelay::default(), &config());
        assert!(matches!(result, Err(RelayError::NoPins)));
    }

    #[test]
    fn test_request_is_clamped() {
        let mut ssr = single();
        ssr.set_output(150.0);
        assert_eq!(ssr.requested(), 100.0);
        ssr.set_output(-3.0);
        assert_eq!(ssr.requested(), 0.0);
        ssr.set_output(f32::NAN);
        assert_eq!(ssr.requested(), 0.0);
    }

    #[test]
    fn test_time_proportional_cycle() {
        let mut ssr = single();
        ssr.set_output(25.0);

        // Output is untouched until update
        assert!(!ssr.is_on());

        ssr.update(0).unwrap();
        assert!(ssr.is_on());
        assert_eq!(ssr.output(), 25.0);
        ssr.update(400).unwrap();
        assert!(ssr.is_on());
        ssr.update(500).unwrap();
        assert!(!ssr.is_on());
        ssr.update(1900).unwrap();
        assert!(!ssr.is_on());

        // Next cycle turns back on
        ssr.update(2000).unwrap();
        assert!(ssr.is_on());
        assert_eq!(ssr.pins[0].edges, 3);
    }

    #[test]
    fn test_duty_locked_mid_cycle() {
        let mut ssr = single();
        ssr.set_output(50.0);
        ssr.update(0).unwrap();

        ssr.set_output(100.0);
        ssr.update(1000).unwrap();
        // Still the locked 50%: off after half the cycle
        assert!(!ssr.is_on());
        assert_eq!(ssr.output(), 50.0);

        ssr.update(2000).unwrap();
        assert_eq!(ssr.output(), 100.0);
        ssr.update(3900).unwrap();
        assert!(ssr.is_on());
    }

    #[test]
    fn test_full_and_zero_duty() {
        let mut ssr = single();
        ssr.set_output(100.0);
        for t in (0..6000).step_by(100) {
            ssr.update(t).unwrap();
            assert!(ssr.is_on());
        }
        assert_eq!(ssr.pins[0].edges, 1);

        ssr.set_output(0.0);
        ssr.update(6000).unwrap();
        assert!(!ssr.is_on());
    }

    #[test]
    fn test_stagger_between_pins() {
        let log = Rc::new(RefCell::new(std::vec::Vec::new()));
        let mut pins = Vec::new();
        for id in 0..3 {
            let _ = pins.push(MockPin::new(id, &log));
        }
        let mut ssr =
            SsrController::new_active_high(pins, MockDelay::default(), &config()).unwrap();
        // Construction drives everything off without stagger
        assert!(ssr.delay.calls_ms.is_empty());
        log.borrow_mut().clear();

        ssr.set_output(50.0);
        ssr.update(0).unwrap();
        assert_eq!(ssr.delay.calls_ms, std::vec![10, 10]);
        assert_eq!(*log.borrow(), std::vec![(0, true), (1, true), (2, true)]);

        ssr.update(1000).unwrap();
        assert_eq!(ssr.delay.calls_ms.len(), 4);
    }

    #[test]
    fn test_force_off_skips_stagger() {
        let log = Rc::new(RefCell::new(std::vec::Vec::new()));
        let mut pins = Vec::new();
        for id in 0..3 {
            let _ = pins.push(MockPin::new(id, &log));
        }
        let mut ssr =
            SsrController::new_active_high(pins, MockDelay::default(), &config()).unwrap();
        ssr.set_output(100.0);
        ssr.update(0).unwrap();
        let delays = ssr.delay.calls_ms.len();

        ssr.force_off().unwrap();
        assert_eq!(ssr.delay.calls_ms.len(), delays);
        assert!(!ssr.is_on());
        assert!(ssr.pins.iter().all(|p| !p.high));

        // The old request does not re-engage mid-cycle
        ssr.update(100).unwrap();
        assert!(!ssr.is_on());
        assert_eq!(ssr.output(), 0.0);
    }

    #[test]
    fn test_active_low_pins() {
        let log = Rc::new(RefCell::new(std::vec::Vec::new()));
        let mut pins = Vec::new();
        let _ = pins.push(MockPin::new(0, &log));
        let mut ssr = SsrController::new(pins, MockDelay::default(), &config(), true).unwrap();
        // Off = high for active-low
        assert!(ssr.pins[0].high);

        ssr.set_output(100.0);
        ssr.update(0).unwrap();
        assert!(ssr.is_on());
        assert!(!ssr.pins[0].high);
    }

    #[test]
    fn test_pin_failure_reported() {
        let mut ssr = single();
        ssr.pins[0].fail = true;
        ssr.set_output(100.0);
        assert_eq!(ssr.update(0), Err(RelayError::Pin));
        assert_eq!(ssr.force_off(), Err(RelayError::Pin));
    }

    /// Edges a single cycle needs for a locked duty, starting from off
    fn implied_transitions(duty: f32, cycle_ms: u64) -> usize {
        let on_ms = (duty / 100.0 * cycle_ms as f32) as u64;
        if on_ms == 0 {
            0
        } else if on_ms >= cycle_ms {
            1
        } else {
            2
        }
    }

    proptest! {
        #[test]
        fn prop_mid_cycle_requests_add_no_transitions(
            initial in 0.0f32..=100.0,
            requests in proptest::collection::vec(proptest::option::of(-20.0f32..120.0), 20),
        ) {
            let mut ssr = single();
            ssr.set_output(initial);
            ssr.update(0).unwrap();
            let locked = ssr.output();

            for (tick, request) in requests.iter().enumerate().skip(1) {
                if let Some(percent) = request {
                    ssr.set_output(*percent);
                }
                ssr.update(tick as u64 * 100).unwrap();
                prop_assert_eq!(ssr.output(), locked);
            }

            prop_assert!(ssr.pins[0].edges <= implied_transitions(locked, 2000));
        }
    }
}
