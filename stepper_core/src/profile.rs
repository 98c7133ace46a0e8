//! Trapezoidal step-timing generator with microstep level switching.
//!
//! [`StepGenerator`] is a pull-based state machine: each call to
//! [`StepGenerator::next_event`] computes exactly one [`StepEvent`]. The
//! engine thread that owns the generator decides when to apply each event;
//! other threads steer it through the shared [`ProfileControls`].
//!
//! Units: positions are microsteps at the finest granularity
//! (`ustep_factor` per full step), speeds are full steps per second (tps),
//! delays are seconds. A level with `m` microsteps per full step moves
//! `ustep_factor / m` microsteps per emitted step.
//!
//! The controls are read once per event. A write that lands between two
//! events takes effect on the next one; a write that lands mid-event is seen
//! one event late.

use crate::atomic::AtomicF64;
use crate::config::Kinematics;
use crate::status::{Direction, DriveState};
use crate::step_table::StepLevel;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// Live-mutable inputs of a running profile.
#[derive(Debug)]
pub struct ProfileControls {
    target_position: AtomicI64,
    max_tps: AtomicF64,
    accel_tps: AtomicF64,
    running: AtomicBool,
    crashing: AtomicBool,
}

impl ProfileControls {
    pub fn new(target_position: i64, max_tps: f64, accel_tps: f64) -> Self {
        Self {
            target_position: AtomicI64::new(target_position),
            max_tps: AtomicF64::new(max_tps),
            accel_tps: AtomicF64::new(accel_tps),
            running: AtomicBool::new(true),
            crashing: AtomicBool::new(false),
        }
    }

    pub fn target_position(&self) -> i64 {
        self.target_position.load(Ordering::Acquire)
    }

    pub fn set_target_position(&self, steps: i64) {
        self.target_position.store(steps, Ordering::Release);
    }

    pub fn max_tps(&self) -> f64 {
        self.max_tps.load()
    }

    pub fn set_max_tps(&self, tps: f64) {
        self.max_tps.store(tps);
    }

    pub fn accel_tps(&self) -> f64 {
        self.accel_tps.load()
    }

    pub fn set_accel_tps(&self, tps: f64) {
        self.accel_tps.store(tps);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_crashing(&self) -> bool {
        self.crashing.load(Ordering::Acquire)
    }

    /// Decelerate to rest, then end the stream.
    pub fn clean_stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// End the stream at the next event, without a deceleration tail.
    pub fn crash_stop(&self) {
        self.crashing.store(true, Ordering::Release);
        self.running.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    /// Stay put; nothing to do for `delay`.
    Hold,
    /// One step in the latched direction at the active level.
    Step,
    /// Latch a direction and (0-based) level before the next step.
    ModeChange { direction: Direction, level: usize },
}

/// One unit of the timing stream. After applying it, wait `delay` seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepEvent {
    pub action: StepAction,
    pub delay: f64,
    /// Position once this event has been applied.
    pub position: i64,
    pub status: DriveState,
    pub tps: f64,
}

impl StepEvent {
    /// `±(level + 1)` for a mode change, sign = direction.
    pub fn signed_level(&self) -> Option<i64> {
        match self.action {
            StepAction::ModeChange { direction, level } => {
                Some(direction.sign() * (level as i64 + 1))
            }
            _ => None,
        }
    }

    pub fn is_step(&self) -> bool {
        matches!(self.action, StepAction::Step)
    }
}

/// Smallest acceleration the generator will use when the live value is
/// unusable (zero, negative, NaN).
const MIN_ACCEL_TPS: f64 = 1e-3;

#[derive(Debug)]
pub struct StepGenerator {
    controls: Arc<ProfileControls>,
    kin: Kinematics,
    levels: Arc<[StepLevel]>,
    position: i64,
    direction: Option<Direction>,
    level: usize,
    tps: f64,
    tick: f64,
    /// Ceiling of the active level.
    level_max: f64,
    /// Ceiling of the level below (0 at the bottom level).
    level_min: f64,
    /// Last usable acceleration read from the controls.
    accel: f64,
    pending: Option<StepEvent>,
    finished: bool,
}

impl StepGenerator {
    /// Start a generator at `position` (microsteps), at rest, on level 0.
    ///
    /// `levels` must have passed [`crate::step_table::check_levels`].
    pub fn new(
        controls: Arc<ProfileControls>,
        kin: Kinematics,
        levels: Arc<[StepLevel]>,
        position: i64,
    ) -> Self {
        let level_max = levels.first().map_or(f64::INFINITY, |l| l.ceiling_tps);
        let mut g = Self {
            controls,
            kin,
            levels,
            position,
            direction: None,
            level: 0,
            tps: kin.start_tps,
            tick: 0.0,
            level_max,
            level_min: 0.0,
            accel: kin.accel_tps,
            pending: None,
            finished: false,
        };
        g.retick();
        g
    }

    pub fn controls(&self) -> &Arc<ProfileControls> {
        &self.controls
    }

    /// Position after the last event, in microsteps.
    pub fn current_position(&self) -> i64 {
        self.position
    }

    pub fn tps(&self) -> f64 {
        self.tps
    }

    pub fn active_level(&self) -> usize {
        self.level
    }

    pub fn direction(&self) -> Option<Direction> {
        self.direction
    }

    /// Next event, or `None` once the stream has ended for good.
    pub fn next_event(&mut self) -> Option<StepEvent> {
        if self.finished {
            return None;
        }
        if self.controls.is_crashing() {
            self.pending = None;
            self.finished = true;
            tracing::debug!(position = self.position, "profile crash stop");
            return None;
        }
        if let Some(ev) = self.pending.take() {
            return Some(ev);
        }
        if self.controls.is_running() {
            Some(self.running_event())
        } else {
            self.tail_event()
        }
    }

    fn microsteps(&self) -> u32 {
        self.levels.get(self.level).map_or(1, |l| l.microsteps.max(1))
    }

    /// Microsteps moved by one step at the active level.
    fn step_size(&self) -> i64 {
        i64::from(self.kin.ustep_factor / self.microsteps()).max(1)
    }

    /// Alignment required to switch between levels `a` and `b`.
    fn switch_boundary(&self, a: usize, b: usize) -> i64 {
        let m = self.levels[a].microsteps.min(self.levels[b].microsteps).max(1);
        i64::from(self.kin.ustep_factor / m).max(1)
    }

    fn retick(&mut self) {
        self.tick = 1.0 / self.tps / f64::from(self.microsteps());
    }

    /// Live max speed, clamped to what the configured levels can carry.
    fn max_tps(&self) -> f64 {
        let ceiling = self.levels.last().map_or(f64::INFINITY, |l| l.ceiling_tps);
        let v = self.controls.max_tps();
        if v.is_nan() {
            return self.kin.start_tps;
        }
        v.clamp(self.kin.start_tps, ceiling.max(self.kin.start_tps))
    }

    fn refresh_accel(&mut self) -> f64 {
        let a = self.controls.accel_tps();
        if a.is_finite() && a > 0.0 {
            self.accel = a;
        }
        self.accel.max(MIN_ACCEL_TPS)
    }

    fn step(&mut self, status: DriveState) -> StepEvent {
        let dir = self.direction.unwrap_or(Direction::Forward);
        self.position = self
            .position
            .saturating_add(dir.sign() * self.step_size());
        StepEvent {
            action: StepAction::Step,
            delay: self.tick,
            position: self.position,
            status,
            tps: self.tps,
        }
    }

    fn mode_change(&self, delay: f64, status: DriveState, tps: f64) -> StepEvent {
        StepEvent {
            action: StepAction::ModeChange {
                direction: self.direction.unwrap_or(Direction::Forward),
                level: self.level,
            },
            delay,
            position: self.position,
            status,
            tps,
        }
    }

    fn hold(&self) -> StepEvent {
        StepEvent {
            action: StepAction::Hold,
            delay: self.kin.hold_tick,
            position: self.position,
            status: DriveState::Halt,
            tps: 0.0,
        }
    }

    fn running_event(&mut self) -> StepEvent {
        let start = self.kin.start_tps;
        let max_tps = self.max_tps();
        let accel = self.refresh_accel();

        let offset = self.controls.target_position().saturating_sub(self.position);
        let distance = offset.unsigned_abs();
        let wanted = Direction::toward(offset);
        let decel_time = (self.tps - start) / accel;
        let avg = (self.tps + start) / 2.0;
        let decel_distance =
            avg * decel_time * f64::from(self.kin.ustep_factor) + self.kin.decel_margin();

        if distance as f64 <= decel_distance || self.direction != Some(wanted) {
            if self.tps > start {
                return self.decelerate(start, accel);
            }
            if distance < self.step_size().unsigned_abs() {
                if self.direction.take().is_some() {
                    tracing::trace!(position = self.position, "parked at target");
                }
                return self.hold();
            }
            if self.direction != Some(wanted) {
                // First step after rest uses the short direction delay.
                let delay = if self.direction.is_none() {
                    self.kin.dir_delay
                } else {
                    self.tick
                };
                self.direction = Some(wanted);
                let change = self.mode_change(delay, DriveState::Halt, 0.0);
                self.pending = Some(self.step(DriveState::Fast));
                return change;
            }
            return self.step(DriveState::Slow);
        }

        if self.tps == max_tps {
            self.step(DriveState::Max)
        } else if self.tps > max_tps {
            self.decelerate(max_tps.max(start), accel)
        } else if self.tps < self.level_max {
            self.tps = (self.tps + accel * self.tick).min(max_tps);
            self.retick();
            self.step(DriveState::Fast)
        } else {
            self.level_up(max_tps, accel)
        }
    }

    /// One decelerating step, clamped at `floor`, switching down a level
    /// when the speed has dropped below the active level's floor.
    fn decelerate(&mut self, floor: f64, accel: f64) -> StepEvent {
        self.tps = (self.tps - accel * self.tick).max(floor);
        if self.level > 0 && self.tps < self.level_min {
            let boundary = self.switch_boundary(self.level, self.level - 1);
            if self.position.rem_euclid(boundary) == 0 {
                self.level -= 1;
                self.level_max = self.level_min;
                self.level_min = if self.level == 0 {
                    0.0
                } else {
                    self.levels[self.level - 1].ceiling_tps
                };
                self.retick();
                tracing::trace!(level = self.level, position = self.position, "level down");
                let change = self.mode_change(0.0, DriveState::Slow, self.tps);
                self.pending = Some(self.step(DriveState::Slow));
                return change;
            }
        }
        self.retick();
        self.step(DriveState::Slow)
    }

    /// At the active level's ceiling but below max speed.
    fn level_up(&mut self, max_tps: f64, accel: f64) -> StepEvent {
        let next = self.level + 1;
        if next >= self.levels.len() {
            self.tps = (self.tps + accel * self.tick).min(max_tps);
            self.retick();
            return self.step(DriveState::Fast);
        }
        let boundary = self.switch_boundary(self.level, next);
        if self.position.rem_euclid(boundary) != 0 {
            // Hold the current speed until the position lines up.
            return self.step(DriveState::Fast);
        }
        let delay = self.tick;
        self.tps = (self.tps + accel * self.tick).min(max_tps);
        self.level = next;
        self.level_min = self.level_max;
        self.level_max = self.levels[next].ceiling_tps;
        tracing::trace!(level = self.level, position = self.position, "level up");
        let change = self.mode_change(delay, DriveState::Fast, self.tps);
        self.retick();
        change
    }

    /// Deceleration tail after a clean stop.
    fn tail_event(&mut self) -> Option<StepEvent> {
        if self.direction.is_some() && self.tps > self.kin.start_tps {
            let accel = self.refresh_accel();
            return Some(self.decelerate(self.kin.start_tps, accel));
        }
        self.finished = true;
        tracing::debug!(position = self.position, "profile finished");
        None
    }
}

impl Iterator for StepGenerator {
    type Item = StepEvent;

    fn next(&mut self) -> Option<StepEvent> {
        self.next_event()
    }
}
