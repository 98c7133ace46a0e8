mod common;

use common::{PINS, SINGLE, kin, single_level, soft_levels, stop_when_parked, wait_for};
use rstest::rstest;
use std::sync::Arc;
use std::time::Duration;
use stepper_core::profile::{ProfileControls, StepGenerator};
use stepper_core::soft::SoftEngine;
use stepper_core::status::{DriveMode, MotorStatus};
use stepper_core::step_table::{StepLevel, StepTable, TablePhase};
use stepper_hardware::{LineWrite, SimulatedOutputs};
use stepper_traits::clock::manual::ManualClock;
use stepper_traits::{HwResult, OutputLines};

const TIMEOUT: Duration = Duration::from_secs(20);

struct Rig {
    outputs: SimulatedOutputs,
    clock: ManualClock,
    status: Arc<MotorStatus>,
    controls: Arc<ProfileControls>,
    generator: StepGenerator,
}

fn rig(ustep_factor: u32, levels: &[StepLevel], start: i64, target: i64) -> Rig {
    let k = kin(ustep_factor);
    let controls = Arc::new(ProfileControls::new(target, k.max_tps, k.accel_tps));
    let generator = StepGenerator::new(Arc::clone(&controls), k, levels.to_vec().into(), start);
    Rig {
        outputs: SimulatedOutputs::new(),
        clock: ManualClock::new(),
        status: Arc::new(MotorStatus::new(start)),
        controls,
        generator,
    }
}

fn level_writes(out: &SimulatedOutputs) -> Vec<(u8, bool)> {
    out.writes()
        .into_iter()
        .filter_map(|w| match w {
            LineWrite::Level { line, high } => Some((line, high)),
            _ => None,
        })
        .collect()
}

#[test]
fn writes_only_lines_that_change() {
    let levels = single_level();
    let mut r = rig(1, &levels, 0, 40);
    let stopper = stop_when_parked(r.controls.clone(), r.status.clone(), 40, TIMEOUT);
    let mut phase = TablePhase::default();
    let mut lines = r.outputs.clone();
    let summary = SoftEngine::new(&mut lines, PINS, &levels, Duration::ZERO, &r.clock, &r.status)
        .run(&mut r.generator, &mut phase)
        .unwrap();
    assert!(stopper.join().unwrap());

    assert_eq!(summary.final_position, 40);
    let writes = level_writes(&r.outputs);
    // first row writes all four lines, each later single-phase row two,
    // then four lows on exit
    assert_eq!(writes.len() as u64, 4 + 2 * (summary.steps - 1) + 4);
    assert!(writes[writes.len() - 4..].iter().all(|&(_, high)| !high));
    assert!(!r.outputs.any_energized(&PINS));
    assert_eq!(r.status.mode(), DriveMode::Off);
    assert_eq!(phase.table_len, 4);
    assert_eq!(phase.index as i64, summary.final_position.rem_euclid(4));
}

#[test]
fn repeated_pin_mask_rows_are_not_rewritten() {
    let doubled = [[1, 0, 0, 0], [1, 0, 0, 0], [0, 1, 0, 0], [0, 1, 0, 0]];
    let levels = vec![StepLevel::new(
        99_999.0,
        1,
        StepTable::pin_mask(&doubled, &PINS).unwrap(),
    )];
    let mut r = rig(1, &levels, 0, 40);
    let stopper = stop_when_parked(r.controls.clone(), r.status.clone(), 40, TIMEOUT);
    let mut phase = TablePhase::default();
    let mut lines = r.outputs.clone();
    let summary = SoftEngine::new(&mut lines, PINS, &levels, Duration::ZERO, &r.clock, &r.status)
        .run(&mut r.generator, &mut phase)
        .unwrap();
    assert!(stopper.join().unwrap());
    assert_eq!(summary.final_position, 40);
    assert_eq!(summary.steps, 40);

    let banks = r.outputs.bank_writes();
    // rows run A B B A per cycle: three writes for the first cycle, two after
    assert_eq!(banks.len(), 3 + 2 * 9);
    assert!(banks.windows(2).all(|w| w[0] != w[1]));
}

#[test]
fn proportional_levels_use_duty_writes() {
    let levels = soft_levels();
    let mut r = rig(4, &levels, 0, 400);
    let stopper = stop_when_parked(r.controls.clone(), r.status.clone(), 400, TIMEOUT);
    let mut phase = TablePhase::default();
    let mut lines = r.outputs.clone();
    let summary = SoftEngine::new(&mut lines, PINS, &levels, Duration::ZERO, &r.clock, &r.status)
        .run(&mut r.generator, &mut phase)
        .unwrap();
    assert!(stopper.join().unwrap());
    assert_eq!(summary.final_position, 400);

    let writes = r.outputs.writes();
    // quarter steps drive duty, the binary levels above them drive levels
    assert!(matches!(writes[0], LineWrite::Duty { .. }));
    assert!(writes.iter().any(|w| matches!(w, LineWrite::Level { high: true, .. })));
    assert!(!writes.iter().any(|w| matches!(w, LineWrite::Bank { .. })));
    assert!(!r.outputs.any_energized(&PINS));
}

#[test]
fn hold_timeout_de_energizes_and_motion_re_energizes() {
    let levels = single_level();
    let mut r = rig(1, &levels, 0, 0);
    let controls = r.controls.clone();
    let status = r.status.clone();
    let watch = r.outputs.clone();
    let driver = std::thread::spawn(move || {
        // parked at 0 until the four lows of the hold timeout appear
        assert!(wait_for(TIMEOUT, || watch.writes().len() >= 4));
        controls.set_target_position(6);
        stop_when_parked(controls, status, 6, TIMEOUT).join().unwrap()
    });
    let mut phase = TablePhase::default();
    let mut lines = r.outputs.clone();
    SoftEngine::new(
        &mut lines,
        PINS,
        &levels,
        Duration::from_millis(1500),
        &r.clock,
        &r.status,
    )
    .run(&mut r.generator, &mut phase)
    .unwrap();
    assert!(driver.join().unwrap());

    let writes = level_writes(&r.outputs);
    assert_eq!(&writes[..4], &PINS.map(|p| (p, false)));
    // the direction change rewrites the whole current row
    let row0: Vec<(u8, bool)> = PINS.iter().zip(SINGLE[0]).map(|(&p, v)| (p, v == 1)).collect();
    assert_eq!(&writes[4..8], row0.as_slice());
    assert!(r.clock.elapsed() >= Duration::from_millis(2100));
}

/// Lines that cost `cost` of (virtual) time per write.
struct SlowLines {
    inner: SimulatedOutputs,
    clock: ManualClock,
    cost: Duration,
}

impl OutputLines for SlowLines {
    fn write(&mut self, line: u8, high: bool) -> HwResult<()> {
        self.clock.advance(self.cost);
        self.inner.write(line, high)
    }
    fn set_duty(&mut self, line: u8, duty: u8) -> HwResult<()> {
        self.clock.advance(self.cost);
        self.inner.set_duty(line, duty)
    }
    fn write_bank(&mut self, set: u32, clear: u32) -> HwResult<()> {
        self.clock.advance(self.cost);
        self.inner.write_bank(set, clear)
    }
}

#[rstest]
#[case::on_time(Duration::ZERO, false)]
#[case::late(Duration::from_millis(80), true)]
fn overruns_are_counted_not_fatal(#[case] cost: Duration, #[case] late: bool) {
    let levels = single_level();
    let mut r = rig(1, &levels, 0, 12);
    let mut lines = SlowLines {
        inner: r.outputs.clone(),
        clock: r.clock.clone(),
        cost,
    };
    let stopper = stop_when_parked(r.controls.clone(), r.status.clone(), 12, TIMEOUT);
    let mut phase = TablePhase::default();
    let summary = SoftEngine::new(&mut lines, PINS, &levels, Duration::ZERO, &r.clock, &r.status)
        .run(&mut r.generator, &mut phase)
        .unwrap();
    assert!(stopper.join().unwrap());
    assert_eq!(summary.final_position, 12);
    assert_eq!(summary.late_events > 0, late);
    assert_eq!(summary.overrun > Duration::ZERO, late);
    assert!(summary.max_overrun <= summary.overrun);
}

#[test]
fn phase_carries_across_runs_and_tables() {
    let four = single_level();
    let mut r = rig(1, &four, 0, 5);
    let stopper = stop_when_parked(r.controls.clone(), r.status.clone(), 5, TIMEOUT);
    let mut phase = TablePhase::default();
    let mut lines = r.outputs.clone();
    SoftEngine::new(&mut lines, PINS, &four, Duration::ZERO, &r.clock, &r.status)
        .run(&mut r.generator, &mut phase)
        .unwrap();
    assert!(stopper.join().unwrap());
    assert_eq!(phase, TablePhase::new(1, 4));

    // an eight-row table picks up at the same point of the cycle
    let eight = vec![StepLevel::new(
        99_999.0,
        1,
        StepTable::binary(&common::HALF).unwrap(),
    )];
    let mut r2 = rig(1, &eight, 5, 5);
    r2.controls.set_target_position(6);
    let stopper = stop_when_parked(r2.controls.clone(), r2.status.clone(), 6, TIMEOUT);
    let mut lines = r2.outputs.clone();
    SoftEngine::new(&mut lines, PINS, &eight, Duration::ZERO, &r2.clock, &r2.status)
        .run(&mut r2.generator, &mut phase)
        .unwrap();
    assert!(stopper.join().unwrap());
    // index 1 of 4 is index 2 of 8; one forward step lands on 3
    assert_eq!(phase, TablePhase::new(3, 8));
    let first: Vec<(u8, bool)> = level_writes(&r2.outputs).into_iter().take(4).collect();
    let row3: Vec<(u8, bool)> = PINS
        .iter()
        .zip(common::HALF[3])
        .map(|(&p, v)| (p, v == 1))
        .collect();
    assert_eq!(first, row3);
}

#[test]
fn hardware_failure_stops_the_run() {
    let levels = single_level();
    let mut r = rig(1, &levels, 0, 1_000_000);
    let outputs = r.outputs.clone();
    let position = r.status.clone();
    let cutter = std::thread::spawn(move || {
        assert!(wait_for(TIMEOUT, || position.position() >= 10));
        outputs.set_connected(false);
    });
    let mut phase = TablePhase::default();
    let mut lines = r.outputs.clone();
    let err = SoftEngine::new(&mut lines, PINS, &levels, Duration::ZERO, &r.clock, &r.status)
        .run(&mut r.generator, &mut phase)
        .unwrap_err();
    cutter.join().unwrap();
    assert_eq!(err, stepper_core::MotionError::HardwareDisconnected);
    assert_eq!(r.status.mode(), DriveMode::Off);
    assert!(r.status.position() >= 10);
}
