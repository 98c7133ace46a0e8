//! DMA tracking engine: turns the timing stream into pre-timed waves on a
//! hardware pulse queue and keeps a short pipeline of them in flight.
//!
//! Flow per iteration:
//! 1. fill: while fewer than `max_waves` are in flight, cut the next wave
//!    from the pulse stream and submit it. A run of holds is never queued;
//!    the engine sleeps through it instead.
//! 2. retire: release every wave the queue has moved past, strictly in
//!    submission order, folding each one's end state into the motor status.
//! 3. if the pipeline is full, sleep one poll interval.
//!
//! A rejected submission ends the run: whatever the motor did after the last
//! retired wave is unknown.

use crate::config::WaveLimits;
use crate::error::MotionError;
use crate::hw_error::map_hw_error;
use crate::profile::{ProfileControls, StepAction, StepGenerator};
use crate::status::{Direction, DriveState, MotorStatus};
use crate::step_table::{PinMask, StepLevel, TablePhase, advance_index, rescale_index};
use crate::util::round_us;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use stepper_traits::{Clock, OutputLines, WaveId, WavePulse, WaveQueue};
use tracing::{debug, error, info, trace, warn};

/// Delay given to the last pulse of a stream.
const FINAL_PULSE_US: u32 = 1;

/// A step (or hold) placed on the run's absolute timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pulse {
    /// Bank write for a step; `None` for a hold.
    pub bits: Option<PinMask>,
    /// Time the pulse is applied, from the start of the run.
    pub time_us: u64,
    pub time_s: f64,
    pub position: i64,
    pub status: DriveState,
    pub tps: f64,
}

impl Pulse {
    pub fn is_hold(&self) -> bool {
        self.bits.is_none()
    }
}

/// Adapts a [`StepGenerator`] into [`Pulse`]s, resolving each step to its
/// table row. Mode changes are absorbed (their delay still advances time).
pub struct PulseStream<'g, 'l> {
    generator: &'g mut StepGenerator,
    levels: &'l [StepLevel],
    level: usize,
    index: usize,
    forward: bool,
    time_s: f64,
    /// Pulse handed back by the wave cutter, returned before the generator
    /// is polled again.
    put_back: Option<Pulse>,
}

impl<'g, 'l> PulseStream<'g, 'l> {
    pub fn new(generator: &'g mut StepGenerator, levels: &'l [StepLevel], phase: TablePhase) -> Self {
        let index = levels.first().map_or(0, |l| phase.index_in(l.table.len()));
        Self {
            generator,
            levels,
            level: 0,
            index,
            forward: true,
            time_s: 0.0,
            put_back: None,
        }
    }

    /// Table position after the last pulse produced.
    pub fn phase(&self) -> TablePhase {
        let len = self.levels.get(self.level).map_or(0, |l| l.table.len());
        TablePhase::new(self.index, len)
    }

    fn put_back(&mut self, pulse: Pulse) {
        self.put_back = Some(pulse);
    }

    fn table_len(&self) -> usize {
        self.levels.get(self.level).map_or(1, |l| l.table.len().max(1))
    }
}

impl Iterator for PulseStream<'_, '_> {
    type Item = Pulse;

    fn next(&mut self) -> Option<Pulse> {
        if let Some(p) = self.put_back.take() {
            return Some(p);
        }
        loop {
            let ev = self.generator.next_event()?;
            let time_s = self.time_s;
            self.time_s += ev.delay.max(0.0);
            let bits = match ev.action {
                StepAction::ModeChange { direction, level } => {
                    self.forward = direction == Direction::Forward;
                    let from = self.table_len();
                    self.level = level.min(self.levels.len().saturating_sub(1));
                    self.index = rescale_index(self.index, from, self.table_len());
                    continue;
                }
                StepAction::Hold => None,
                StepAction::Step => {
                    self.index = advance_index(self.index, self.forward, self.table_len());
                    Some(
                        self.levels
                            .get(self.level)
                            .and_then(|l| l.table.pin_masks())
                            .and_then(|m| m.get(self.index).copied())
                            .unwrap_or_default(),
                    )
                }
            };
            return Some(Pulse {
                bits,
                time_us: round_us(time_s),
                time_s,
                position: ev.position,
                status: ev.status,
                tps: ev.tps,
            });
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DmaSummary {
    pub pulses: u64,
    pub waves_submitted: u64,
    pub waves_retired: u64,
    /// Time spent sleeping through holds.
    pub hold_time: Duration,
    pub final_position: i64,
    /// In-flight waves were dropped by a crash stop.
    pub aborted: bool,
}

/// State of the motor once a wave (or hold run) has completed.
#[derive(Debug, Clone, Copy, PartialEq)]
struct EndState {
    position: i64,
    status: DriveState,
    tps: f64,
}

impl EndState {
    fn of(p: &Pulse) -> Self {
        Self {
            position: p.position,
            status: p.status,
            tps: p.tps,
        }
    }
}

struct InFlight {
    id: WaveId,
    end: EndState,
    buffer: Vec<WavePulse>,
}

pub struct DmaEngine<'a, O: OutputLines + ?Sized, Q: WaveQueue + ?Sized, C: Clock> {
    outputs: &'a mut O,
    queue: &'a mut Q,
    /// Every winding line, for de-energizing.
    pins_mask: u32,
    levels: &'a [StepLevel],
    hold_timeout: Duration,
    limits: WaveLimits,
    clock: &'a C,
    status: &'a MotorStatus,
    controls: &'a ProfileControls,
}

impl<'a, O, Q, C> DmaEngine<'a, O, Q, C>
where
    O: OutputLines + ?Sized,
    Q: WaveQueue + ?Sized,
    C: Clock,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        outputs: &'a mut O,
        queue: &'a mut Q,
        pins_mask: u32,
        levels: &'a [StepLevel],
        hold_timeout: Duration,
        limits: WaveLimits,
        clock: &'a C,
        status: &'a MotorStatus,
        controls: &'a ProfileControls,
    ) -> Self {
        Self {
            outputs,
            queue,
            pins_mask,
            levels,
            hold_timeout,
            limits,
            clock,
            status,
            controls,
        }
    }

    /// Drive `generator` to exhaustion, then drain the pipeline. The queue is
    /// cleared, outputs de-energized and the status set to off on every exit
    /// path.
    pub fn run(
        &mut self,
        generator: &mut StepGenerator,
        phase: &mut TablePhase,
    ) -> Result<DmaSummary, MotionError> {
        let result = self.track(generator, phase);
        if let Err(e) = self.queue.abort() {
            warn!(error = %e, "failed to clear wave queue");
        }
        if let Err(e) = self.outputs.write_bank(0, self.pins_mask) {
            warn!(error = %e, "failed to de-energize outputs");
        }
        self.status.set_off();
        match &result {
            Ok(s) => info!(
                pulses = s.pulses,
                waves = s.waves_submitted,
                retired = s.waves_retired,
                hold_ms = s.hold_time.as_millis() as u64,
                aborted = s.aborted,
                position = s.final_position,
                "dma engine finished"
            ),
            Err(e) => warn!(error = %e, "dma engine stopped on error"),
        }
        result
    }

    fn track(
        &mut self,
        generator: &mut StepGenerator,
        phase: &mut TablePhase,
    ) -> Result<DmaSummary, MotionError> {
        self.queue.abort().map_err(|e| map_hw_error(&*e))?;
        let max_waves = self.limits.max_waves.max(1);
        let levels = self.levels;
        let mut summary = DmaSummary::default();
        let mut stream = PulseStream::new(generator, levels, *phase);
        let mut in_flight: VecDeque<InFlight> = VecDeque::with_capacity(max_waves);
        let mut spare: Vec<Vec<WavePulse>> = Vec::with_capacity(max_waves);
        let mut hold_deadline: Option<Instant> = None;
        let mut energized = true;
        let mut current = stream.next();

        while current.is_some() && !self.controls.is_crashing() {
            while in_flight.len() < max_waves {
                let Some(head) = current else { break };

                if head.is_hold() {
                    let (held, end, next) = collect_holds(&mut stream, head, self.limits.max_span_us);
                    current = next;
                    summary.hold_time += held;
                    if hold_deadline.is_none() && !self.hold_timeout.is_zero() {
                        hold_deadline = Some(self.clock.now() + self.hold_timeout);
                    }
                    if in_flight.is_empty() {
                        let state = if energized { end.status } else { DriveState::Off };
                        self.status.publish(end.position, state, end.tps);
                    }
                    self.clock.sleep(held);
                    if let Some(deadline) = hold_deadline
                        && energized
                        && in_flight.is_empty()
                        && self.clock.now() >= deadline
                    {
                        self.outputs
                            .write_bank(0, self.pins_mask)
                            .map_err(|e| map_hw_error(&*e))?;
                        energized = false;
                        self.status.set_state(DriveState::Off);
                        debug!(position = end.position, "hold timeout, outputs off");
                    }
                    break;
                }

                let mut buffer = spare.pop().unwrap_or_default();
                buffer.clear();
                let (end, next) = fill_wave(&mut stream, head, &mut buffer, &self.limits);
                current = next;
                let id = match self.queue.submit_wave(&buffer) {
                    Ok(id) => id,
                    Err(e) => {
                        let reason = match map_hw_error(&*e) {
                            MotionError::QueueRejected(r) => r,
                            other => other.to_string(),
                        };
                        dump_rejected(&buffer, &reason);
                        return Err(MotionError::QueueRejected(reason));
                    }
                };
                trace!(
                    %id,
                    pulses = buffer.len(),
                    span_us = stepper_traits::wave::span_us(&buffer),
                    end = end.position,
                    "wave submitted"
                );
                summary.pulses += buffer.len() as u64;
                summary.waves_submitted += 1;
                hold_deadline = None;
                energized = true;
                in_flight.push_back(InFlight { id, end, buffer });
            }

            self.retire(&mut in_flight, &mut spare, &mut summary)?;
            if in_flight.len() >= max_waves {
                self.clock.sleep(self.limits.poll);
            }
        }

        if self.controls.is_crashing() {
            self.queue.abort().map_err(|e| map_hw_error(&*e))?;
            summary.aborted = !in_flight.is_empty();
            debug!(dropped = in_flight.len(), "crash stop, in-flight waves dropped");
            in_flight.clear();
        }
        while !in_flight.is_empty() {
            self.clock.sleep(self.limits.poll);
            self.retire(&mut in_flight, &mut spare, &mut summary)?;
        }

        *phase = stream.phase();
        summary.final_position = self.status.position();
        Ok(summary)
    }

    /// Release every wave the queue has moved past, oldest first.
    fn retire(
        &mut self,
        in_flight: &mut VecDeque<InFlight>,
        spare: &mut Vec<Vec<WavePulse>>,
        summary: &mut DmaSummary,
    ) -> Result<(), MotionError> {
        while let Some(head) = in_flight.front() {
            let running = self.queue.current_wave().map_err(|e| map_hw_error(&*e))?;
            if running == Some(head.id) {
                break;
            }
            let Some(done) = in_flight.pop_front() else {
                break;
            };
            self.queue
                .release_wave(done.id)
                .map_err(|e| map_hw_error(&*e))?;
            self.status
                .publish(done.end.position, done.end.status, done.end.tps);
            summary.waves_retired += 1;
            trace!(id = %done.id, position = done.end.position, "wave retired");
            spare.push(done.buffer);
        }
        Ok(())
    }
}

/// Cut one wave from the stream starting at step pulse `head`. Returns the
/// end state of the wave and the first pulse not included.
///
/// The delays of a wave add up to at most `max_span_us`, except that a wave
/// always takes at least one pulse.
fn fill_wave(
    stream: &mut PulseStream<'_, '_>,
    head: Pulse,
    buffer: &mut Vec<WavePulse>,
    limits: &WaveLimits,
) -> (EndState, Option<Pulse>) {
    let mut this = head;
    let mut end = EndState::of(&head);
    let mut span_us = 0u64;
    loop {
        let mask = this.bits.unwrap_or_default();
        let Some(next) = stream.next() else {
            if !buffer.is_empty() && span_us + u64::from(FINAL_PULSE_US) > limits.max_span_us {
                return (end, Some(this));
            }
            buffer.push(WavePulse::new(mask.set, mask.clear, FINAL_PULSE_US));
            return (EndState::of(&this), None);
        };
        let dt = next.time_us.saturating_sub(this.time_us);
        if !buffer.is_empty() && span_us + dt > limits.max_span_us {
            // `this` opens the next wave.
            stream.put_back(next);
            return (end, Some(this));
        }
        buffer.push(WavePulse::new(
            mask.set,
            mask.clear,
            u32::try_from(dt).unwrap_or(u32::MAX),
        ));
        span_us += dt;
        end = EndState::of(&this);
        if next.is_hold() || buffer.len() >= limits.max_pulses {
            return (end, Some(next));
        }
        this = next;
    }
}

/// Consume a run of consecutive holds starting at `head`, up to `max_span_us`
/// of hold time. Returns the time to sleep, the parked state, and the first
/// pulse not consumed.
fn collect_holds(
    stream: &mut PulseStream<'_, '_>,
    head: Pulse,
    max_span_us: u64,
) -> (Duration, EndState, Option<Pulse>) {
    let mut this = head;
    let mut held_us = 0u64;
    loop {
        let end = EndState::of(&this);
        let Some(next) = stream.next() else {
            return (Duration::from_micros(held_us), end, None);
        };
        held_us += next.time_us.saturating_sub(this.time_us);
        if !next.is_hold() || held_us > max_span_us {
            return (Duration::from_micros(held_us), end, Some(next));
        }
        this = next;
    }
}

fn dump_rejected(buffer: &[WavePulse], reason: &str) {
    error!(pulses = buffer.len(), reason, "wave submission rejected");
    for (index, p) in buffer.iter().enumerate() {
        error!(
            index,
            on = %format_args!("{:#010x}", p.on),
            off = %format_args!("{:#010x}", p.off),
            delay_us = p.delay_us,
            "rejected pulse"
        );
    }
}
