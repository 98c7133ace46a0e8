//! Output backends for the stepper motion core.
//!
//! - [`sim`]: recording output lines and a clock-driven wave queue
//! - [`player`]: a threaded wave queue over any output lines
//! - `rpi` (feature `hardware`): rppal GPIO lines

pub mod error;
pub mod player;
#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod rpi;
pub mod sim;

pub use player::PlayerWaveQueue;
pub use sim::{LineWrite, SimulatedOutputs, SimulatedWaveQueue};

use std::sync::{Arc, Mutex, PoisonError};
use stepper_traits::{HwResult, OutputLines};

/// Output lines shared between owners, e.g. the controller (for
/// de-energizing) and a [`PlayerWaveQueue`] (for playing waves).
#[derive(Debug)]
pub struct SharedLines<T> {
    inner: Arc<Mutex<T>>,
}

impl<T> Clone for SharedLines<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: OutputLines> SharedLines<T> {
    pub fn new(lines: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(lines)),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

impl<T: OutputLines> OutputLines for SharedLines<T> {
    fn write(&mut self, line: u8, high: bool) -> HwResult<()> {
        self.with(|l| l.write(line, high))
    }

    fn set_duty(&mut self, line: u8, duty: u8) -> HwResult<()> {
        self.with(|l| l.set_duty(line, duty))
    }

    fn write_bank(&mut self, set: u32, clear: u32) -> HwResult<()> {
        self.with(|l| l.write_bank(set, clear))
    }

    fn is_connected(&self) -> bool {
        self.with(|l| l.is_connected())
    }
}
