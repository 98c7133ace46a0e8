//! Software tracking engine: applies the timing stream with direct line
//! writes from the engine thread.
//!
//! Event *k* is applied at the sum of the delays of events `0..k`, measured
//! from the first event against the engine's clock, so per-step processing
//! cost does not stretch the cadence. Missed deadlines are summed as overrun
//! and the run carries on.

use crate::error::MotionError;
use crate::hw_error::map_hw_error;
use crate::profile::{StepAction, StepGenerator};
use crate::status::{Direction, DriveState, MotorStatus};
use crate::step_table::{StepLevel, StepTable, TablePhase, WINDINGS, advance_index, rescale_index};
use crate::util::secs;
use std::time::Duration;
use stepper_traits::{Clock, OutputLines};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoftSummary {
    pub events: u64,
    pub steps: u64,
    /// Number of events applied after their deadline.
    pub late_events: u64,
    /// Total time by which deadlines were missed.
    pub overrun: Duration,
    pub max_overrun: Duration,
    pub final_position: i64,
}

/// Last value written to each winding; `None` = unknown.
type WrittenCache = [Option<u8>; WINDINGS];

pub struct SoftEngine<'a, O: OutputLines + ?Sized, C: Clock> {
    outputs: &'a mut O,
    pins: [u8; WINDINGS],
    levels: &'a [StepLevel],
    hold_timeout: Duration,
    clock: &'a C,
    status: &'a MotorStatus,
}

impl<'a, O: OutputLines + ?Sized, C: Clock> SoftEngine<'a, O, C> {
    pub fn new(
        outputs: &'a mut O,
        pins: [u8; WINDINGS],
        levels: &'a [StepLevel],
        hold_timeout: Duration,
        clock: &'a C,
        status: &'a MotorStatus,
    ) -> Self {
        Self {
            outputs,
            pins,
            levels,
            hold_timeout,
            clock,
            status,
        }
    }

    /// Drive `generator` to exhaustion. Outputs are de-energized and the
    /// status set to off on every exit path.
    pub fn run(
        &mut self,
        generator: &mut StepGenerator,
        phase: &mut TablePhase,
    ) -> Result<SoftSummary, MotionError> {
        let result = self.track(generator, phase);
        if let Err(e) = self.de_energize() {
            warn!(error = %e, "failed to de-energize outputs");
        }
        self.status.set_off();
        match &result {
            Ok(s) => info!(
                steps = s.steps,
                events = s.events,
                late = s.late_events,
                overrun_ms = s.overrun.as_millis() as u64,
                max_overrun_us = s.max_overrun.as_micros() as u64,
                position = s.final_position,
                "soft engine finished"
            ),
            Err(e) => warn!(error = %e, "soft engine stopped on error"),
        }
        result
    }

    fn track(
        &mut self,
        generator: &mut StepGenerator,
        phase: &mut TablePhase,
    ) -> Result<SoftSummary, MotionError> {
        let levels = self.levels;
        let mut summary = SoftSummary {
            final_position: generator.current_position(),
            ..SoftSummary::default()
        };
        let Some(first) = levels.first() else {
            return Ok(summary);
        };

        let mut active = 0usize;
        let mut index = phase.index_in(first.table.len());
        let mut forward = true;
        let mut cache: WrittenCache = [None; WINDINGS];
        let mut energized = true;
        let mut held = Duration::ZERO;

        let Some(mut event) = generator.next_event() else {
            return Ok(summary);
        };
        let mut deadline = self.clock.now();
        loop {
            summary.events += 1;
            let delay = secs(event.delay);
            deadline += delay;
            let mut state = event.status;

            match event.action {
                StepAction::Step => {
                    let table = &levels[active].table;
                    index = advance_index(index, forward, table.len());
                    self.apply_row(table, index, &mut cache)?;
                    energized = true;
                    held = Duration::ZERO;
                    summary.steps += 1;
                }
                StepAction::ModeChange { direction, level } => {
                    forward = direction == Direction::Forward;
                    let from = levels[active].table.len();
                    active = level.min(levels.len() - 1);
                    index = rescale_index(index, from, levels[active].table.len());
                    held = Duration::ZERO;
                    if !energized {
                        self.apply_row(&levels[active].table, index, &mut cache)?;
                        energized = true;
                        debug!(position = event.position, "outputs re-energized");
                    }
                }
                StepAction::Hold => {
                    if energized && !self.hold_timeout.is_zero() {
                        if held >= self.hold_timeout {
                            self.de_energize()?;
                            cache = [None; WINDINGS];
                            energized = false;
                            debug!(
                                position = event.position,
                                held_ms = held.as_millis() as u64,
                                "hold timeout, outputs off"
                            );
                        }
                        held += delay;
                    }
                    if !energized {
                        state = DriveState::Off;
                    }
                }
            }

            self.status.publish(event.position, state, event.tps);
            let late = self.clock.sleep_until(deadline);
            if !late.is_zero() {
                summary.late_events += 1;
                summary.overrun += late;
                summary.max_overrun = summary.max_overrun.max(late);
            }

            match generator.next_event() {
                Some(next) => event = next,
                None => break,
            }
        }

        *phase = TablePhase::new(index, levels[active].table.len());
        summary.final_position = generator.current_position();
        Ok(summary)
    }

    /// Write one table row, skipping lines whose value is unchanged.
    fn apply_row(
        &mut self,
        table: &StepTable,
        index: usize,
        cache: &mut WrittenCache,
    ) -> Result<(), MotionError> {
        match table {
            StepTable::Binary(rows) => {
                for (w, &v) in rows[index].iter().enumerate() {
                    if cache[w] != Some(v) {
                        self.outputs
                            .write(self.pins[w], v != 0)
                            .map_err(|e| map_hw_error(&*e))?;
                        cache[w] = Some(v);
                    }
                }
            }
            StepTable::Proportional(rows) => {
                for (w, &v) in rows[index].iter().enumerate() {
                    if cache[w] != Some(v) {
                        self.outputs
                            .set_duty(self.pins[w], v)
                            .map_err(|e| map_hw_error(&*e))?;
                        cache[w] = Some(v);
                    }
                }
            }
            StepTable::PinMask(masks) => {
                let m = masks[index];
                let row: WrittenCache =
                    std::array::from_fn(|w| Some(u8::from(m.set & (1 << self.pins[w]) != 0)));
                if *cache != row {
                    self.outputs
                        .write_bank(m.set, m.clear)
                        .map_err(|e| map_hw_error(&*e))?;
                    *cache = row;
                }
            }
        }
        Ok(())
    }

    fn de_energize(&mut self) -> Result<(), MotionError> {
        for &pin in &self.pins {
            self.outputs
                .write(pin, false)
                .map_err(|e| map_hw_error(&*e))?;
        }
        Ok(())
    }
}
