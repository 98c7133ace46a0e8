#![allow(dead_code)]

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use stepper_core::config::Kinematics;
use stepper_core::profile::{ProfileControls, StepAction, StepEvent, StepGenerator};
use stepper_core::status::MotorStatus;
use stepper_core::step_table::{StepLevel, StepTable};

pub const PINS: [u8; 4] = [4, 5, 6, 7];

pub const SINGLE: [[u32; 4]; 4] = [[1, 0, 0, 0], [0, 1, 0, 0], [0, 0, 1, 0], [0, 0, 0, 1]];

pub const HALF: [[u32; 4]; 8] = [
    [1, 0, 0, 0],
    [1, 1, 0, 0],
    [0, 1, 0, 0],
    [0, 1, 1, 0],
    [0, 0, 1, 0],
    [0, 0, 1, 1],
    [0, 0, 0, 1],
    [1, 0, 0, 1],
];

/// 16-row sine/cosine duty table.
pub fn pwm16() -> Vec<[u32; 4]> {
    (0..16)
        .map(|i| {
            let a = f64::from(i) * std::f64::consts::TAU / 16.0;
            let duty = |x: f64| (x.max(0.0) * 255.0).round() as u32;
            [duty(a.cos()), duty(a.sin()), duty(-a.cos()), duty(-a.sin())]
        })
        .collect()
}

pub fn kin(ustep_factor: u32) -> Kinematics {
    Kinematics {
        start_tps: 10.0,
        max_tps: 300.0,
        accel_tps: 100.0,
        dir_delay: 0.001,
        hold_tick: 0.7,
        ustep_factor,
        decel_margin: None,
    }
}

fn binary(rows: &[[u32; 4]]) -> StepTable {
    StepTable::binary(rows).unwrap()
}

/// One full-step binary level.
pub fn single_level() -> Vec<StepLevel> {
    vec![StepLevel::new(99_999.0, 1, binary(&SINGLE))]
}

/// pwm quarter steps, binary half steps, binary full steps (ustep_factor 4).
pub fn soft_levels() -> Vec<StepLevel> {
    vec![
        StepLevel::new(25.0, 4, StepTable::proportional(&pwm16()).unwrap()),
        StepLevel::new(50.0, 2, binary(&HALF)),
        StepLevel::new(99_999.0, 1, binary(&SINGLE)),
    ]
}

/// Pin-mask half steps then full steps (ustep_factor 2).
pub fn block_levels() -> Vec<StepLevel> {
    vec![
        StepLevel::new(60.0, 2, StepTable::pin_mask(&HALF, &PINS).unwrap()),
        StepLevel::new(99_999.0, 1, StepTable::pin_mask(&SINGLE, &PINS).unwrap()),
    ]
}

/// Level sets keyed by ustep_factor, only the microstep structure matters.
pub fn levels_for(ustep_factor: u32) -> Vec<StepLevel> {
    let l = |ceiling: f64, m: u32| StepLevel::new(ceiling, m, binary(&SINGLE));
    match ustep_factor {
        1 => vec![l(99_999.0, 1)],
        2 => vec![l(30.0, 2), l(99_999.0, 1)],
        4 => vec![l(25.0, 4), l(50.0, 2), l(99_999.0, 1)],
        _ => vec![l(25.0, 8), l(50.0, 4), l(80.0, 4), l(99_999.0, 2)],
    }
}

pub fn generator(kin: Kinematics, levels: Vec<StepLevel>, target: i64) -> StepGenerator {
    let controls = Arc::new(ProfileControls::new(target, kin.max_tps, kin.accel_tps));
    StepGenerator::new(controls, kin, levels.into(), 0)
}

/// Pull events up to and including the first hold (or stream end).
pub fn until_hold(g: &mut StepGenerator, limit: usize) -> Vec<StepEvent> {
    let mut out = Vec::new();
    while out.len() < limit {
        let Some(ev) = g.next_event() else { break };
        let hold = ev.action == StepAction::Hold;
        out.push(ev);
        if hold {
            break;
        }
    }
    out
}

/// Clean-stop `controls` once `status` shows the motor parked at `target`.
/// Crash-stops after `timeout` of real time so a broken run cannot hang.
pub fn stop_when_parked(
    controls: Arc<ProfileControls>,
    status: Arc<MotorStatus>,
    target: i64,
    timeout: Duration,
) -> JoinHandle<bool> {
    std::thread::spawn(move || {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if status.position() == target && status.tps() == 0.0 {
                controls.clean_stop();
                return true;
            }
            std::thread::sleep(Duration::from_micros(200));
        }
        controls.crash_stop();
        false
    })
}

/// Poll `cond` in real time until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_micros(200));
    }
    cond()
}
