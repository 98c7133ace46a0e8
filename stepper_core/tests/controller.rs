mod common;

use common::{PINS, block_levels, kin, single_level, wait_for};
use std::time::Duration;
use stepper_core::config::{DriveStyle, MotionStyle, MotorConfig, WaveLimits};
use stepper_core::error::MotionError;
use stepper_core::status::{DriveMode, DriveState};
use stepper_core::MotorController;
use stepper_hardware::{SimulatedOutputs, SimulatedWaveQueue};
use stepper_traits::clock::manual::ManualClock;

const TIMEOUT: Duration = Duration::from_secs(20);

type Controller = MotorController<SimulatedOutputs, SimulatedWaveQueue<ManualClock>, ManualClock>;

fn config() -> MotorConfig {
    let soft = MotionStyle::new(kin(1), single_level(), Duration::ZERO).unwrap();
    let dma = MotionStyle::new(kin(2), block_levels(), Duration::ZERO).unwrap();
    let waves = WaveLimits {
        max_pulses: 8,
        max_waves: 3,
        max_span_us: 500_000,
        poll: Duration::from_millis(20),
    };
    MotorConfig::new(PINS, 4.0)
        .unwrap()
        .with_style("soft", DriveStyle::soft(soft))
        .with_style("dma", DriveStyle::dma(dma, waves).unwrap())
}

struct Bench {
    ctl: Controller,
    outputs: SimulatedOutputs,
    queue: SimulatedWaveQueue<ManualClock>,
}

fn bench_with(queue: impl FnOnce(SimulatedWaveQueue<ManualClock>) -> SimulatedWaveQueue<ManualClock>) -> Bench {
    let clock = ManualClock::new();
    let outputs = SimulatedOutputs::new();
    let queue = queue(SimulatedWaveQueue::new(clock.clone()));
    let ctl = MotorController::new(config(), outputs.clone(), queue.clone(), clock).unwrap();
    Bench { ctl, outputs, queue }
}

fn bench() -> Bench {
    bench_with(|q| q)
}

fn parked_at(ctl: &Controller, steps: i64) -> bool {
    wait_for(TIMEOUT, || {
        ctl.current_position_steps() == steps && ctl.current_tps() == 0.0
    })
}

fn wait_idle(ctl: &Controller) -> bool {
    wait_for(TIMEOUT, || !ctl.is_active())
}

#[test]
fn construction_switches_every_winding_off() {
    let b = bench();
    let writes = b.outputs.writes();
    assert_eq!(writes.len(), 4);
    assert!(!b.outputs.any_energized(&PINS));
    assert_eq!(b.ctl.drive_mode(), DriveMode::Off);
    assert_eq!(b.ctl.drive_state(), DriveState::Off);
    assert_eq!(b.ctl.style_names(), vec!["dma", "soft"]);
    assert_eq!(b.ctl.step_style(), None);
}

#[test]
fn disconnected_hardware_is_refused() {
    let clock = ManualClock::new();
    let res = MotorController::new(
        config(),
        SimulatedOutputs::disconnected(),
        SimulatedWaveQueue::new(clock.clone()),
        clock,
    );
    assert_eq!(res.err(), Some(MotionError::HardwareDisconnected));
}

#[test]
fn initial_position_is_in_units() {
    let clock = ManualClock::new();
    let ctl = MotorController::new(
        config().with_initial_position(2.5),
        SimulatedOutputs::new(),
        SimulatedWaveQueue::new(clock.clone()),
        clock,
    )
    .unwrap();
    assert_eq!(ctl.current_position_steps(), 10);
    assert_eq!(ctl.current_position(), 2.5);
    assert_eq!(ctl.target_position(), 2.5);
}

#[test]
fn unknown_style_is_an_error() {
    let b = bench();
    assert_eq!(
        b.ctl.run("turbo"),
        Err(MotionError::UnknownStyle("turbo".into()))
    );
    assert!(!b.ctl.is_active());
    assert_eq!(b.ctl.drive_mode(), DriveMode::Off);
}

#[test]
fn second_run_is_refused_while_active() {
    let b = bench();
    b.ctl.set_target_position(10_000.0);
    b.ctl.run("soft").unwrap();
    assert_eq!(b.ctl.run("dma"), Err(MotionError::AlreadyRunning));
    assert_eq!(b.ctl.step_style().as_deref(), Some("soft"));
    b.ctl.crash_stop_and_wait(Duration::from_millis(1)).unwrap();
    assert!(!b.ctl.is_active());
    assert!(!b.outputs.any_energized(&PINS));
}

#[test]
fn idle_setters_keep_the_target_only() {
    let b = bench();
    b.ctl.set_target_position(25.0);
    b.ctl.set_max_tps(50.0);
    b.ctl.set_acceleration(50.0);
    b.ctl.set_target_position(f64::NAN);
    assert_eq!(b.ctl.target_position(), 25.0);
    assert_eq!(b.ctl.max_tps(), None);
    assert_eq!(b.ctl.acceleration(), None);
    // nothing moved
    assert_eq!(b.ctl.current_position_steps(), 0);
}

#[test]
fn soft_run_reaches_target_and_returns() {
    let b = bench();
    b.ctl.set_target_position(25.0);
    b.ctl.run("soft").unwrap();
    assert_eq!(b.ctl.drive_mode(), DriveMode::Soft);
    assert!(parked_at(&b.ctl, 100));
    assert_eq!(b.ctl.current_position(), 25.0);

    b.ctl.set_max_tps(120.0);
    b.ctl.set_acceleration(-3.0);
    assert_eq!(b.ctl.max_tps(), Some(120.0));
    assert_eq!(b.ctl.acceleration(), Some(100.0));

    b.ctl.set_target_position(0.0);
    assert!(parked_at(&b.ctl, 0));
    b.ctl.clean_stop();
    assert!(wait_idle(&b.ctl));
    assert_eq!(b.ctl.drive_mode(), DriveMode::Off);
    assert_eq!(b.ctl.drive_state(), DriveState::Off);
    assert_eq!(b.ctl.last_error(), None);
    assert!(!b.outputs.any_energized(&PINS));
    // the idle controller keeps the last target
    assert_eq!(b.ctl.target_position(), 0.0);
}

#[test]
fn runs_can_switch_styles() {
    let b = bench();
    b.ctl.set_target_position(50.0);
    b.ctl.run("soft").unwrap();
    assert!(parked_at(&b.ctl, 200));
    b.ctl.clean_stop();
    assert!(wait_idle(&b.ctl));

    b.ctl.set_target_position(100.0);
    b.ctl.run("dma").unwrap();
    assert_eq!(b.ctl.drive_mode(), DriveMode::Dma);
    assert!(parked_at(&b.ctl, 400));
    b.ctl.clean_stop();
    assert!(wait_idle(&b.ctl));
    assert_eq!(b.ctl.step_style().as_deref(), Some("dma"));
    assert!(!b.queue.submitted().is_empty());
    assert!(!b.outputs.any_energized(&PINS));
}

#[test]
fn crash_stop_freezes_the_position() {
    let b = bench();
    b.ctl.set_target_position(100_000.0);
    b.ctl.run("soft").unwrap();
    assert!(wait_for(TIMEOUT, || b.ctl.current_position_steps() >= 100));
    b.ctl.crash_stop();
    assert!(wait_idle(&b.ctl));

    let stopped = b.ctl.current_position_steps();
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(b.ctl.current_position_steps(), stopped);
    assert!(stopped < 400_000);
    assert_eq!(b.ctl.drive_state(), DriveState::Off);
    assert!(!b.outputs.any_energized(&PINS));
    assert_eq!(b.ctl.last_error(), None);

    // the hardware is back and a new run starts from where it stopped
    b.ctl.set_target_position(0.0);
    b.ctl.run("soft").unwrap();
    assert!(parked_at(&b.ctl, 0));
    b.ctl.clean_stop();
    assert!(wait_idle(&b.ctl));
}

#[test]
fn rejected_wave_is_reported_after_the_run() {
    let b = bench_with(|q| q.rejecting_after(1));
    b.ctl.set_target_position(500.0);
    b.ctl.run("dma").unwrap();
    assert!(wait_idle(&b.ctl));

    match b.ctl.last_error() {
        Some(MotionError::QueueRejected(reason)) => assert!(reason.contains("out of resources")),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(b.ctl.drive_mode(), DriveMode::Off);
    assert_eq!(b.queue.in_queue(), 0);
    assert!(!b.outputs.any_energized(&PINS));
    assert!(b.ctl.take_last_error().is_some());
    assert_eq!(b.ctl.last_error(), None);
}

#[test]
fn drop_stops_a_running_engine() {
    let b = bench();
    b.ctl.set_target_position(100_000.0);
    b.ctl.run("dma").unwrap();
    assert!(wait_for(TIMEOUT, || b.ctl.current_position_steps() >= 50));
    let Bench { ctl, outputs, queue } = b;
    drop(ctl);
    assert!(!outputs.any_energized(&PINS));
    assert_eq!(queue.in_queue(), 0);
}

#[test]
fn out_of_range_target_is_ignored() {
    let b = bench();
    b.ctl.set_target_position(25.0);
    b.ctl.set_target_position(-1e300);
    b.ctl.set_target_position(f64::MAX);
    assert_eq!(b.ctl.target_position(), 25.0);

    b.ctl.run("soft").unwrap();
    assert!(parked_at(&b.ctl, 100));
    b.ctl.set_target_position(1e300);
    b.ctl.clean_stop();
    assert!(wait_idle(&b.ctl));
    assert_eq!(b.ctl.last_error(), None);
    assert_eq!(b.ctl.current_position_steps(), 100);

    // the engine survived, so the next run starts normally
    b.ctl.run("soft").unwrap();
    b.ctl.crash_stop_and_wait(Duration::from_millis(1)).unwrap();
    assert_eq!(b.ctl.last_error(), None);
}
