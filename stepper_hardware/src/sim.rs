//! In-memory backends: output lines that remember every write, and a wave
//! queue that "plays" waves against a [`Clock`] instead of real hardware.
//!
//! Both are cheap to clone; clones share state, so a test can keep a handle
//! for inspection while the controller owns another.

use crate::error::HwError;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use stepper_traits::{Clock, HwResult, OutputLines, WaveId, WavePulse, WaveQueue};
use tracing::trace;

/// Number of addressable lines (one GPIO bank).
pub const LINES: usize = 32;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One recorded call on [`SimulatedOutputs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineWrite {
    Level { line: u8, high: bool },
    Duty { line: u8, duty: u8 },
    Bank { set: u32, clear: u32 },
}

#[derive(Debug)]
struct OutputState {
    /// Present duty of each line, 0 = low, 255 = high.
    duty: [u8; LINES],
    log: Vec<LineWrite>,
    connected: bool,
}

#[derive(Debug, Clone)]
pub struct SimulatedOutputs {
    state: Arc<Mutex<OutputState>>,
}

impl Default for SimulatedOutputs {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedOutputs {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(OutputState {
                duty: [0; LINES],
                log: Vec::new(),
                connected: true,
            })),
        }
    }

    /// Lines whose backend is unreachable; every write fails.
    pub fn disconnected() -> Self {
        let s = Self::new();
        s.set_connected(false);
        s
    }

    pub fn set_connected(&self, connected: bool) {
        lock(&self.state).connected = connected;
    }

    /// Every call so far, oldest first.
    pub fn writes(&self) -> Vec<LineWrite> {
        lock(&self.state).log.clone()
    }

    /// Only the bank writes, as `(set, clear)` pairs.
    pub fn bank_writes(&self) -> Vec<(u32, u32)> {
        lock(&self.state)
            .log
            .iter()
            .filter_map(|w| match *w {
                LineWrite::Bank { set, clear } => Some((set, clear)),
                _ => None,
            })
            .collect()
    }

    pub fn clear_log(&self) {
        lock(&self.state).log.clear();
    }

    pub fn duty(&self, line: u8) -> u8 {
        lock(&self.state)
            .duty
            .get(usize::from(line))
            .copied()
            .unwrap_or(0)
    }

    /// True if any of `lines` is driven at all.
    pub fn any_energized(&self, lines: &[u8]) -> bool {
        lines.iter().any(|&l| self.duty(l) > 0)
    }

    fn record(&self, w: LineWrite, line: Option<u8>) -> HwResult<MutexGuard<'_, OutputState>> {
        let mut st = lock(&self.state);
        if !st.connected {
            return Err(Box::new(HwError::Disconnected));
        }
        if let Some(line) = line
            && usize::from(line) >= LINES
        {
            return Err(Box::new(HwError::Gpio(format!("line {line} out of range"))));
        }
        st.log.push(w);
        Ok(st)
    }
}

impl OutputLines for SimulatedOutputs {
    fn write(&mut self, line: u8, high: bool) -> HwResult<()> {
        let mut st = self.record(LineWrite::Level { line, high }, Some(line))?;
        st.duty[usize::from(line)] = if high { 255 } else { 0 };
        Ok(())
    }

    fn set_duty(&mut self, line: u8, duty: u8) -> HwResult<()> {
        let mut st = self.record(LineWrite::Duty { line, duty }, Some(line))?;
        st.duty[usize::from(line)] = duty;
        Ok(())
    }

    fn write_bank(&mut self, set: u32, clear: u32) -> HwResult<()> {
        let mut st = self.record(LineWrite::Bank { set, clear }, None)?;
        for (line, d) in st.duty.iter_mut().enumerate() {
            if set & (1 << line) != 0 {
                *d = 255;
            } else if clear & (1 << line) != 0 {
                *d = 0;
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }
}

#[derive(Debug)]
struct Scheduled {
    id: WaveId,
    start: Instant,
    end: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    next_id: u32,
    scheduled: VecDeque<Scheduled>,
    /// End of the last wave queued since the last abort.
    tail: Option<Instant>,
    submitted: Vec<(WaveId, Vec<WavePulse>)>,
    released: Vec<WaveId>,
    aborts: usize,
    peak: usize,
    /// Accept this many submissions, reject the rest.
    accept_limit: Option<usize>,
}

/// A wave queue whose waves run back to back on the given clock.
#[derive(Debug, Clone)]
pub struct SimulatedWaveQueue<C: Clock> {
    clock: C,
    max_pulses: usize,
    state: Arc<Mutex<QueueState>>,
}

impl<C: Clock> SimulatedWaveQueue<C> {
    /// Largest wave the simulated queue accepts.
    pub const DEFAULT_MAX_PULSES: usize = 12_000;

    pub fn new(clock: C) -> Self {
        Self {
            clock,
            max_pulses: Self::DEFAULT_MAX_PULSES,
            state: Arc::new(Mutex::new(QueueState::default())),
        }
    }

    #[must_use]
    pub fn with_max_pulses(mut self, max_pulses: usize) -> Self {
        self.max_pulses = max_pulses;
        self
    }

    /// Reject every submission after the first `n`.
    #[must_use]
    pub fn rejecting_after(self, n: usize) -> Self {
        lock(&self.state).accept_limit = Some(n);
        self
    }

    /// All accepted waves in submission order.
    pub fn submitted(&self) -> Vec<Vec<WavePulse>> {
        lock(&self.state)
            .submitted
            .iter()
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn submitted_ids(&self) -> Vec<WaveId> {
        lock(&self.state).submitted.iter().map(|(id, _)| *id).collect()
    }

    pub fn released(&self) -> Vec<WaveId> {
        lock(&self.state).released.clone()
    }

    pub fn aborts(&self) -> usize {
        lock(&self.state).aborts
    }

    /// Waves submitted and neither released nor aborted.
    pub fn in_queue(&self) -> usize {
        lock(&self.state).scheduled.len()
    }

    /// Most waves ever held at once.
    pub fn peak_in_queue(&self) -> usize {
        lock(&self.state).peak
    }
}

impl<C: Clock> WaveQueue for SimulatedWaveQueue<C> {
    fn submit_wave(&mut self, pulses: &[WavePulse]) -> HwResult<WaveId> {
        let now = self.clock.now();
        let mut st = lock(&self.state);
        if pulses.is_empty() {
            return Err(Box::new(HwError::QueueRejected("empty wave".into())));
        }
        if pulses.len() > self.max_pulses {
            return Err(Box::new(HwError::QueueRejected(format!(
                "{} pulses exceed capacity {}",
                pulses.len(),
                self.max_pulses
            ))));
        }
        if st.accept_limit.is_some_and(|n| st.submitted.len() >= n) {
            return Err(Box::new(HwError::QueueRejected("queue out of resources".into())));
        }
        let id = WaveId(st.next_id);
        st.next_id += 1;
        let start = st.tail.map_or(now, |t| t.max(now));
        let end = start + Duration::from_micros(stepper_traits::wave::span_us(pulses));
        st.tail = Some(end);
        st.scheduled.push_back(Scheduled { id, start, end });
        st.peak = st.peak.max(st.scheduled.len());
        st.submitted.push((id, pulses.to_vec()));
        trace!(%id, pulses = pulses.len(), "simulated wave queued");
        Ok(id)
    }

    fn current_wave(&mut self) -> HwResult<Option<WaveId>> {
        let now = self.clock.now();
        let st = lock(&self.state);
        Ok(st
            .scheduled
            .iter()
            .find(|w| w.start <= now && now < w.end)
            .map(|w| w.id))
    }

    fn release_wave(&mut self, id: WaveId) -> HwResult<()> {
        let mut st = lock(&self.state);
        let Some(pos) = st.scheduled.iter().position(|w| w.id == id) else {
            return Err(Box::new(HwError::UnknownWave(id.0)));
        };
        st.scheduled.remove(pos);
        st.released.push(id);
        Ok(())
    }

    fn abort(&mut self) -> HwResult<()> {
        let mut st = lock(&self.state);
        st.scheduled.clear();
        st.tail = None;
        st.aborts += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepper_traits::clock::manual::ManualClock;

    #[test]
    fn bank_write_sets_then_clears() {
        let mut out = SimulatedOutputs::new();
        out.write_bank(0b0110, 0b1001).unwrap();
        assert_eq!(out.duty(1), 255);
        assert_eq!(out.duty(2), 255);
        assert_eq!(out.duty(0), 0);
        out.write_bank(0, 0b0110).unwrap();
        assert!(!out.any_energized(&[0, 1, 2, 3]));
        assert_eq!(out.bank_writes(), vec![(0b0110, 0b1001), (0, 0b0110)]);
    }

    #[test]
    fn disconnected_lines_fail_every_write() {
        let mut out = SimulatedOutputs::disconnected();
        assert!(!out.is_connected());
        let err = out.write(3, true).unwrap_err();
        assert!(err.to_string().contains("disconnected"));
    }

    #[test]
    fn waves_run_back_to_back() {
        let clock = ManualClock::new();
        let mut q = SimulatedWaveQueue::new(clock.clone());
        let a = q.submit_wave(&[WavePulse::new(1, 0, 1000)]).unwrap();
        let b = q.submit_wave(&[WavePulse::new(0, 1, 500)]).unwrap();
        assert_eq!(q.current_wave().unwrap(), Some(a));
        clock.advance(Duration::from_micros(1000));
        assert_eq!(q.current_wave().unwrap(), Some(b));
        clock.advance(Duration::from_micros(500));
        assert_eq!(q.current_wave().unwrap(), None);
        q.release_wave(a).unwrap();
        assert!(q.release_wave(a).is_err());
    }
}
