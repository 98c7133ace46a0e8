//! Stand-in collaborators for tests, benches and offline tooling.

use std::sync::{Arc, Mutex, PoisonError};
use stepper_traits::{HwResult, WaveId, WavePulse, WaveQueue};

/// A wave queue that refuses every submission and records what it was
/// offered. Useful for soft-only setups and for exercising rejection paths.
#[derive(Debug, Default, Clone)]
pub struct RejectingQueue {
    offered: Arc<Mutex<Vec<Vec<WavePulse>>>>,
}

impl RejectingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every batch passed to `submit_wave`, in order.
    pub fn offered(&self) -> Vec<Vec<WavePulse>> {
        self.offered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl WaveQueue for RejectingQueue {
    fn submit_wave(&mut self, pulses: &[WavePulse]) -> HwResult<WaveId> {
        self.offered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(pulses.to_vec());
        Err(Box::new(std::io::Error::other("wave queue is not available")))
    }

    fn current_wave(&mut self) -> HwResult<Option<WaveId>> {
        Ok(None)
    }

    fn release_wave(&mut self, _id: WaveId) -> HwResult<()> {
        Ok(())
    }

    fn abort(&mut self) -> HwResult<()> {
        Ok(())
    }
}
