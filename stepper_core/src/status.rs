//! Drive mode/state enums and the status block an engine publishes into.

use crate::atomic::AtomicF64;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};

/// Which tracking engine (if any) currently owns the outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DriveMode {
    Off = 0,
    Soft = 1,
    Dma = 2,
}

impl DriveMode {
    const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Soft,
            2 => Self::Dma,
            _ => Self::Off,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Soft => "soft",
            Self::Dma => "dma",
        }
    }
}

impl fmt::Display for DriveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the motor is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DriveState {
    /// Outputs de-energized.
    Off = 0,
    /// Parked (or reversing) at start speed.
    Halt = 1,
    /// Accelerating.
    Fast = 2,
    /// Decelerating or positioning at start speed.
    Slow = 3,
    /// Cruising at max speed.
    Max = 4,
}

impl DriveState {
    const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Halt,
            2 => Self::Fast,
            3 => Self::Slow,
            4 => Self::Max,
            _ => Self::Off,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Halt => "halt",
            Self::Fast => "fast",
            Self::Slow => "slow",
            Self::Max => "max",
        }
    }
}

impl fmt::Display for DriveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    /// Direction that reduces `offset`; zero counts as forward.
    #[inline]
    pub const fn toward(offset: i64) -> Self {
        if offset < 0 { Self::Reverse } else { Self::Forward }
    }

    #[inline]
    pub const fn sign(self) -> i64 {
        match self {
            Self::Forward => 1,
            Self::Reverse => -1,
        }
    }
}

/// Live status shared between the engine thread (writer) and callers
/// (readers). Each field is its own atomic.
#[derive(Debug)]
pub struct MotorStatus {
    mode: AtomicU8,
    state: AtomicU8,
    position: AtomicI64,
    tps: AtomicF64,
}

impl MotorStatus {
    pub fn new(position: i64) -> Self {
        Self {
            mode: AtomicU8::new(DriveMode::Off as u8),
            state: AtomicU8::new(DriveState::Off as u8),
            position: AtomicI64::new(position),
            tps: AtomicF64::new(0.0),
        }
    }

    pub fn mode(&self) -> DriveMode {
        DriveMode::from_u8(self.mode.load(Ordering::Acquire))
    }

    pub fn set_mode(&self, mode: DriveMode) {
        self.mode.store(mode as u8, Ordering::Release);
    }

    pub fn state(&self) -> DriveState {
        DriveState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: DriveState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn position(&self) -> i64 {
        self.position.load(Ordering::Acquire)
    }

    pub fn tps(&self) -> f64 {
        self.tps.load()
    }

    /// Publish one event's worth of state.
    pub fn publish(&self, position: i64, state: DriveState, tps: f64) {
        self.position.store(position, Ordering::Release);
        self.state.store(state as u8, Ordering::Release);
        self.tps.store(tps);
    }

    /// Mark the motor stopped with outputs off.
    pub fn set_off(&self) {
        self.tps.store(0.0);
        self.set_state(DriveState::Off);
        self.set_mode(DriveMode::Off);
    }
}
