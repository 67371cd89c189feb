use super::*;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::vec::Vec;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use kiln_protocol::{ProfileName, TuningStage};

use crate::schedule::Step;
use crate::traits::SensorError;

type Channels = KilnChannels<CriticalSectionRawMutex>;

/// Hardware state shared between the mocks and the test body
#[derive(Default)]
struct Bench {
    /// Scripted readings; when empty the simulated kiln is read
    readings: VecDeque<Result<f32, SensorError>>,
    temp: f32,
    /// Simulate a first-order kiln driven by the relay
    simulate: bool,
    outputs: VecDeque<f32>,
    /// Requested duty
    duty: f32,
    /// Duty in force for the current relay cycle
    locked: f32,
    cycle_start: Option<u64>,
    cycle_ms: u64,
    on: bool,
    force_offs: u32,
    relay_updates: Vec<u64>,
    fail_relay: bool,
    feeds: u32,
    delays: Vec<u32>,
    load_attempts: u32,
    load_failures: u32,
}

type Shared = Rc<RefCell<Bench>>;

struct MockSensor(Shared);

impl TemperatureSensor for MockSensor {
    fn read_celsius(&mut self) -> Result<f32, SensorError> {
        let mut bench = self.0.borrow_mut();
        bench.readings.pop_front().unwrap_or(Ok(bench.temp))
    }
}

struct MockRelay(Shared);

impl RelayOutput for MockRelay {
    fn set_output(&mut self, percent: f32) {
        self.0.borrow_mut().duty = percent.clamp(0.0, 100.0);
    }

    fn update(&mut self, now_ms: u64) -> Result<(), RelayError> {
        let mut bench = self.0.borrow_mut();
        if bench.fail_relay {
            return Err(RelayError::Pin);
        }
        bench.relay_updates.push(now_ms);

        // Same time-proportioning as the SSR driver: the duty only changes
        // at a cycle boundary
        let start = match bench.cycle_start {
            Some(start) if now_ms.saturating_sub(start) < bench.cycle_ms => start,
            _ => {
                bench.locked = bench.duty;
                bench.cycle_start = Some(now_ms);
                now_ms
            }
        };
        let on_ms = (bench.locked / 100.0 * bench.cycle_ms as f32) as u64;
        bench.on = now_ms.saturating_sub(start) < on_ms;

        if bench.simulate {
            // Dead time 30 s, then first-order lag toward 20 + 8 * duty
            let duty = bench.locked;
            bench.outputs.push_back(duty);
            let delayed = if bench.outputs.len() > 30 {
                bench.outputs.pop_front().unwrap_or(0.0)
            } else {
                0.0
            };
            let next = bench.temp + (20.0 + 8.0 * delayed - bench.temp) / 300.0;
            bench.temp = next;
        }
        Ok(())
    }

    fn force_off(&mut self) -> Result<(), RelayError> {
        let mut bench = self.0.borrow_mut();
        bench.duty = 0.0;
        bench.locked = 0.0;
        bench.cycle_start = None;
        bench.on = false;
        bench.force_offs += 1;
        Ok(())
    }

    fn output(&self) -> f32 {
        self.0.borrow().duty
    }

    fn is_on(&self) -> bool {
        self.0.borrow().on
    }
}

struct MockWatchdog(Shared);

impl Watchdog for MockWatchdog {
    fn feed(&mut self) {
        self.0.borrow_mut().feeds += 1;
    }
}

struct MockDelay(Shared);

impl DelayNs for MockDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.0.borrow_mut().delays.push(ns / 1_000_000);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.0.borrow_mut().delays.push(ms);
    }
}

struct MockStore(Shared);

impl ProfileStore for MockStore {
    fn load(&mut self, name: &str) -> Result<Profile, ProfileError> {
        let mut bench = self.0.borrow_mut();
        bench.load_attempts += 1;
        if bench.load_failures > 0 {
            bench.load_failures -= 1;
            return Err(ProfileError::Unavailable);
        }
        if name != "test" {
            return Err(ProfileError::NotFound);
        }
        Profile::new("test")?
            .with_step(Step::Ramp {
                target: 100.0,
                rate: Some(100.0),
                min_rate: None,
            })?
            .with_step(Step::Hold {
                target: 100.0,
                duration_s: 600,
            })
    }
}

type Cycle<'a> =
    ControlCycle<'a, MockSensor, MockRelay, MockWatchdog, MockStore, MockDelay, CriticalSectionRawMutex>;

/// One relay sub-step per cycle keeps delays to profile retries only
fn test_config() -> KilnConfig {
    let mut config = KilnConfig::default();
    config.timing.relay_period_ms = config.timing.control_period_ms;
    config
}

fn setup(channels: &Channels, config: KilnConfig) -> (Cycle<'_>, Shared) {
    let bench: Shared = Rc::new(RefCell::new(Bench {
        temp: 20.0,
        cycle_ms: config.relay.cycle_ms as u64,
        ..Bench::default()
    }));
    let cycle = ControlCycle::new(
        config,
        MockSensor(bench.clone()),
        MockRelay(bench.clone()),
        MockWatchdog(bench.clone()),
        MockStore(bench.clone()),
        MockDelay(bench.clone()),
        channels,
    );
    (cycle, bench)
}

fn run(name: &str) -> Command {
    Command::RunProfile {
        profile: ProfileName::try_from(name).unwrap(),
    }
}

fn latest_firing(channels: &Channels) -> kiln_protocol::FiringStatus {
    match channels.cache().latest() {
        Some(StatusMessage::Firing(status)) => status,
        other => panic!("expected firing status, got {:?}", other),
    }
}

#[test]
fn test_idle_cycle_feeds_watchdog() {
    let channels = Channels::new();
    let (mut cycle, bench) = setup(&channels, test_config());

    assert_eq!(cycle.run_cycle(0), Ok(CycleOutcome::Continue));
    assert_eq!(cycle.state(), State::Idle);
    assert_eq!(bench.borrow().feeds, 1);
    assert_eq!(bench.borrow().duty, 0.0);
    assert_eq!(latest_firing(&channels).state, KilnState::Idle);
}

#[test]
fn test_run_profile_heats() {
    let channels = Channels::new();
    let (mut cycle, bench) = setup(&channels, test_config());

    channels.send_command(run("test")).unwrap();
    cycle.run_cycle(0).unwrap();
    assert_eq!(cycle.state(), State::Running);

    // Target moves ahead of a cold kiln
    cycle.run_cycle(60_000).unwrap();
    assert!(bench.borrow().duty > 0.0);
    assert!(bench.borrow().on);

    let status = latest_firing(&channels);
    assert_eq!(status.state, KilnState::Running);
    assert_eq!(status.profile.as_deref(), Some("test"));
    assert!(status.target_temp > 20.0);
    assert_eq!(bench.borrow().feeds, 2);
}

#[test]
fn test_run_while_running_rejected() {
    let channels = Channels::new();
    let (mut cycle, bench) = setup(&channels, test_config());

    channels.send_command(run("test")).unwrap();
    cycle.run_cycle(0).unwrap();
    channels.send_command(run("test")).unwrap();
    cycle.run_cycle(1000).unwrap();

    assert_eq!(cycle.state(), State::Running);
    // Busy check happens before the store is touched
    assert_eq!(bench.borrow().load_attempts, 1);
}

#[test]
fn test_over_temperature_forces_relay_off() {
    let channels = Channels::new();
    let (mut cycle, bench) = setup(&channels, test_config());

    channels.send_command(run("test")).unwrap();
    cycle.run_cycle(0).unwrap();

    bench.borrow_mut().temp = 1320.0;
    cycle.run_cycle(1000).unwrap();

    assert_eq!(cycle.state(), State::Error(FaultKind::OverTemperature));
    assert!(bench.borrow().force_offs >= 1);
    assert_eq!(bench.borrow().duty, 0.0);
    assert!(!bench.borrow().on);
    let status = latest_firing(&channels);
    assert_eq!(status.state, KilnState::Error);
    assert!(status.error.unwrap().starts_with("over temperature"));
}

#[test]
fn test_error_terminal_until_stop() {
    let channels = Channels::new();
    let (mut cycle, bench) = setup(&channels, test_config());

    bench.borrow_mut().temp = 1320.0;
    cycle.run_cycle(0).unwrap();
    assert!(cycle.state().is_error());

    bench.borrow_mut().temp = 25.0;
    channels.send_command(run("test")).unwrap();
    cycle.run_cycle(1000).unwrap();
    assert!(cycle.state().is_error());

    channels.send_command(Command::Stop).unwrap();
    cycle.run_cycle(2000).unwrap();
    assert_eq!(cycle.state(), State::Idle);
}

#[test]
fn test_sensor_faults_tolerated_then_fatal() {
    let channels = Channels::new();
    let (mut cycle, bench) = setup(&channels, test_config());

    channels.send_command(run("test")).unwrap();
    cycle.run_cycle(0).unwrap();

    for i in 0..10u64 {
        bench
            .borrow_mut()
            .readings
            .push_back(Err(SensorError::OpenCircuit));
        cycle.run_cycle(1000 * (i + 1)).unwrap();
        assert_eq!(cycle.state(), State::Running);
    }

    bench
        .borrow_mut()
        .readings
        .push_back(Err(SensorError::OpenCircuit));
    cycle.run_cycle(11_000).unwrap();

    assert_eq!(cycle.state(), State::Error(FaultKind::SensorFault));
    assert_eq!(bench.borrow().duty, 0.0);
    let status = latest_firing(&channels);
    assert!(status.error.unwrap().starts_with("thermocouple"));
}

#[test]
fn test_no_reading_keeps_relay_off() {
    let channels = Channels::new();
    let (mut cycle, bench) = setup(&channels, test_config());

    bench
        .borrow_mut()
        .readings
        .push_back(Err(SensorError::ShortToGround));
    channels.send_command(run("test")).unwrap();
    cycle.run_cycle(0).unwrap();

    // No temperature to start from; the run is refused
    assert_eq!(cycle.state(), State::Idle);
    assert_eq!(bench.borrow().load_attempts, 0);
}

#[test]
fn test_profile_load_retried() {
    let channels = Channels::new();
    let (mut cycle, bench) = setup(&channels, test_config());

    bench.borrow_mut().load_failures = 2;
    channels.send_command(run("test")).unwrap();
    cycle.run_cycle(0).unwrap();

    assert_eq!(cycle.state(), State::Running);
    assert_eq!(bench.borrow().load_attempts, 3);
    assert_eq!(bench.borrow().delays, [100, 200]);
}

#[test]
fn test_profile_load_gives_up() {
    let channels = Channels::new();
    let (mut cycle, bench) = setup(&channels, test_config());

    channels.send_command(run("missing")).unwrap();
    cycle.run_cycle(0).unwrap();

    assert_eq!(cycle.state(), State::Error(FaultKind::ProfileLoad));
    assert_eq!(bench.borrow().load_attempts, 3);
    let status = latest_firing(&channels);
    assert_eq!(
        status.error.as_deref(),
        Some("profile 'missing': profile not found")
    );
}

#[test]
fn test_resume_fills_current_temperature() {
    let channels = Channels::new();
    let (mut cycle, bench) = setup(&channels, test_config());

    bench.borrow_mut().temp = 40.0;
    channels
        .send_command(Command::ResumeProfile(ResumeRequest {
            profile: ProfileName::try_from("test").unwrap(),
            elapsed_s: 1800,
            current_rate: None,
            last_logged_temp: Some(70.0),
            current_temp: None,
            step_index: None,
        }))
        .unwrap();
    cycle.run_cycle(0).unwrap();

    assert_eq!(cycle.state(), State::Running);
    assert!(cycle.controller().is_recovering());
    let status = latest_firing(&channels);
    assert!(status.recovering);
    assert_eq!(status.recovery_target, Some(70.0));
}

#[test]
fn test_shutdown() {
    let channels = Channels::new();
    let (mut cycle, bench) = setup(&channels, test_config());

    channels.send_command(run("test")).unwrap();
    cycle.run_cycle(0).unwrap();
    channels.send_command(Command::Shutdown).unwrap();

    assert_eq!(cycle.run_cycle(1000), Ok(CycleOutcome::Shutdown));
    assert_eq!(cycle.state(), State::Idle);
    assert!(bench.borrow().force_offs >= 1);
    assert!(!bench.borrow().on);

    // The caller keeps access to the watchdog after the loop ends
    assert_eq!(bench.borrow().feeds, 2);
    cycle.watchdog_mut().feed();
    assert_eq!(bench.borrow().feeds, 3);
}

#[test]
fn test_relay_failure_skips_watchdog() {
    let channels = Channels::new();
    let (mut cycle, bench) = setup(&channels, test_config());

    cycle.run_cycle(0).unwrap();
    bench.borrow_mut().fail_relay = true;

    assert_eq!(
        cycle.run_cycle(1000),
        Err(CycleError::Relay(RelayError::Pin))
    );
    assert_eq!(bench.borrow().feeds, 1);
    assert_eq!(cycle.state(), State::Error(FaultKind::RelayFault));
}

#[test]
fn test_relay_sub_stepped() {
    let channels = Channels::new();
    let (mut cycle, bench) = setup(&channels, KilnConfig::default());

    cycle.run_cycle(5000).unwrap();

    let bench = bench.borrow();
    let expected: Vec<u64> = (0..10).map(|i| 5000 + i * 100).collect();
    assert_eq!(bench.relay_updates, expected);
    assert_eq!(bench.delays, [100; 9]);
}

#[test]
fn test_ping_forces_status() {
    let channels = Channels::new();
    let (mut cycle, _bench) = setup(&channels, test_config());

    cycle.run_cycle(0).unwrap();
    assert!(channels.try_status().is_ok());

    cycle.run_cycle(100).unwrap();
    assert!(channels.try_status().is_err());

    channels.send_command(Command::Ping).unwrap();
    cycle.run_cycle(200).unwrap();
    assert_eq!(channels.try_status().map(|s| s.timestamp_ms()), Ok(200));
}

#[test]
fn test_quiet_mode_keeps_control_running() {
    let channels = Channels::new();
    let (mut cycle, bench) = setup(&channels, test_config());

    channels.quiet().set(true);
    channels.send_command(run("test")).unwrap();
    cycle.run_cycle(0).unwrap();
    cycle.run_cycle(60_000).unwrap();

    assert_eq!(cycle.state(), State::Running);
    assert!(bench.borrow().duty > 0.0);
    assert!(channels.try_status().is_err());
    assert!(channels.cache().latest().is_some());
}

#[test]
fn test_tuning_session_applies_gains() {
    let channels = Channels::new();
    let (mut cycle, bench) = setup(&channels, test_config());
    bench.borrow_mut().simulate = true;

    channels
        .send_command(Command::StartTuning {
            mode: TuningMode::Safe,
            max_temp: None,
        })
        .unwrap();

    let mut final_status = None;
    for s in 0..4 * 3600u64 {
        cycle.run_cycle(s * 1000).unwrap();
        while let Ok(status) = channels.try_status() {
            if let StatusMessage::Tuning(tuning) = status {
                final_status = Some(tuning);
            }
        }
        if cycle.state() != State::Tuning {
            break;
        }
    }

    assert_eq!(cycle.state(), State::Idle);
    let status = final_status.unwrap();
    assert_eq!(status.stage, TuningStage::Complete);
    let result = status.result.unwrap();

    let tuned = PidGains::new(result.kp, result.ki, result.kd);
    assert_eq!(cycle.pid().gains(), tuned);
    // Below the scaling reference the schedule returns the tuned gains
    assert_eq!(cycle.gains_at(100.0), tuned);
    assert_eq!(bench.borrow().duty, 0.0);
    assert!(!bench.borrow().on);
}

#[test]
fn test_stop_tuning() {
    let channels = Channels::new();
    let (mut cycle, bench) = setup(&channels, test_config());

    channels
        .send_command(Command::StartTuning {
            mode: TuningMode::Standard,
            max_temp: Some(150.0),
        })
        .unwrap();
    cycle.run_cycle(0).unwrap();
    assert_eq!(cycle.state(), State::Tuning);
    assert_eq!(bench.borrow().duty, 100.0);

    assert!(bench.borrow().on);

    // Mid relay cycle, with full duty locked in
    channels.send_command(Command::StopTuning).unwrap();
    cycle.run_cycle(1000).unwrap();
    assert_eq!(cycle.state(), State::Idle);
    assert_eq!(bench.borrow().duty, 0.0);
    assert_eq!(bench.borrow().locked, 0.0);
    assert!(!bench.borrow().on);

    let mut cancelled = false;
    while let Ok(status) = channels.try_status() {
        if let StatusMessage::Tuning(tuning) = status {
            cancelled |= tuning.stage == TuningStage::Error;
        }
    }
    assert!(cancelled);
}

#[test]
fn test_tuning_rejected_while_running() {
    let channels = Channels::new();
    let (mut cycle, _bench) = setup(&channels, test_config());

    channels.send_command(run("test")).unwrap();
    channels
        .send_command(Command::StartTuning {
            mode: TuningMode::Safe,
            max_temp: None,
        })
        .unwrap();
    cycle.run_cycle(0).unwrap();
    assert_eq!(cycle.state(), State::Running);
}

#[test]
fn test_stop_cuts_locked_duty() {
    let channels = Channels::new();
    let (mut cycle, bench) = setup(&channels, test_config());

    channels.send_command(run("test")).unwrap();
    cycle.run_cycle(0).unwrap();
    cycle.run_cycle(60_000).unwrap();
    assert!(bench.borrow().locked > 0.0);
    assert!(bench.borrow().on);
    let force_offs = bench.borrow().force_offs;

    channels.send_command(Command::Stop).unwrap();
    cycle.run_cycle(60_001).unwrap();

    assert_eq!(cycle.state(), State::Idle);
    assert_eq!(bench.borrow().force_offs, force_offs + 1);
    assert!(!bench.borrow().on);

    // Stays off for the rest of the old relay cycle
    cycle.run_cycle(61_000).unwrap();
    assert!(!bench.borrow().on);
}

#[test]
fn test_tuning_timeout_cuts_locked_duty() {
    let config = test_config();
    let timeout_ms = config.tuning.mode(TuningMode::Safe).timeout_s as u64 * 1000;
    let channels = Channels::new();
    let (mut cycle, bench) = setup(&channels, config);

    channels
        .send_command(Command::StartTuning {
            mode: TuningMode::Safe,
            max_temp: None,
        })
        .unwrap();
    cycle.run_cycle(0).unwrap();

    // A cold kiln never reaches the target; full power right up to the timeout
    cycle.run_cycle(timeout_ms - 1000).unwrap();
    assert_eq!(cycle.state(), State::Tuning);
    assert_eq!(bench.borrow().locked, 100.0);

    cycle.run_cycle(timeout_ms + 500).unwrap();
    assert_eq!(cycle.state(), State::Idle);
    assert!(!bench.borrow().on);
    assert_eq!(bench.borrow().locked, 0.0);
}

#[test]
fn test_completion_cuts_locked_duty() {
    let channels = Channels::new();
    let (mut cycle, bench) = setup(&channels, test_config());

    channels.send_command(run("test")).unwrap();
    cycle.run_cycle(0).unwrap();

    // Ramp done; the hold starts here
    bench.borrow_mut().temp = 100.0;
    cycle.run_cycle(1000).unwrap();
    assert_eq!(cycle.controller().step_index(), 1);

    // Just below target the heater is on when the hold runs out
    bench.borrow_mut().temp = 95.0;
    cycle.run_cycle(600_000).unwrap();
    assert!(bench.borrow().on);

    bench.borrow_mut().temp = 100.0;
    cycle.run_cycle(601_000).unwrap();
    assert_eq!(cycle.state(), State::Complete);
    assert!(!bench.borrow().on);
    assert_eq!(bench.borrow().locked, 0.0);
}

#[test]
fn test_reading_above_sensor_range_faults_at_once() {
    let config = test_config();
    let reading = config.safety.sensor_max_c + 30.0;
    let channels = Channels::new();
    let (mut cycle, bench) = setup(&channels, config);

    channels.send_command(run("test")).unwrap();
    cycle.run_cycle(0).unwrap();
    cycle.run_cycle(60_000).unwrap();
    assert_eq!(cycle.state(), State::Running);

    bench.borrow_mut().readings.push_back(Ok(reading));
    cycle.run_cycle(61_000).unwrap();

    assert_eq!(cycle.state(), State::Error(FaultKind::OverTemperature));
    assert!(!bench.borrow().on);
    let status = latest_firing(&channels);
    assert!(status.error.unwrap().starts_with("over temperature"));
}

#[test]
fn test_reading_above_sensor_range_ends_tuning() {
    let config = test_config();
    let reading = config.safety.sensor_max_c + 30.0;
    let channels = Channels::new();
    let (mut cycle, bench) = setup(&channels, config);

    channels
        .send_command(Command::StartTuning {
            mode: TuningMode::Safe,
            max_temp: None,
        })
        .unwrap();
    cycle.run_cycle(0).unwrap();

    bench.borrow_mut().readings.push_back(Ok(reading));
    cycle.run_cycle(1000).unwrap();

    assert_eq!(cycle.state(), State::Error(FaultKind::OverTemperature));
    assert!(!bench.borrow().on);
}
