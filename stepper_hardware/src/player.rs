//! A [`WaveQueue`] that plays waves from a dedicated thread against any
//! [`OutputLines`], for boards without a hardware pulse engine.
//!
//! Submitted waves travel to the player over a channel. The list of pending
//! ids is updated on the caller's side at submit time, so `current_wave()`
//! never reports a wave as finished before the player has reached it.

use crate::error::HwError;
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use stepper_traits::{Clock, HwResult, OutputLines, WaveId, WavePulse, WaveQueue};
use tracing::{debug, error, trace, warn};

enum Command {
    Play {
        id: WaveId,
        generation: u64,
        pulses: Vec<WavePulse>,
    },
    Shutdown,
}

#[derive(Default)]
struct Shared {
    pending: Mutex<VecDeque<WaveId>>,
    /// Bumped by `abort`; waves from older generations are skipped.
    generation: AtomicU64,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, VecDeque<WaveId>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct PlayerWaveQueue {
    tx: Sender<Command>,
    shared: Arc<Shared>,
    next_id: u32,
    max_pulses: usize,
    handle: Option<JoinHandle<()>>,
}

impl PlayerWaveQueue {
    pub const DEFAULT_MAX_PULSES: usize = 12_000;

    /// Start the player thread. It owns `lines` until the queue is dropped.
    pub fn spawn<L, C>(lines: L, clock: C) -> crate::error::Result<Self>
    where
        L: OutputLines + Send + 'static,
        C: Clock + Send + 'static,
    {
        let (tx, rx) = unbounded();
        let shared = Arc::new(Shared::default());
        let player_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("wave-player".into())
            .spawn(move || play_loop(lines, clock, &rx, &player_shared))?;
        Ok(Self {
            tx,
            shared,
            next_id: 0,
            max_pulses: Self::DEFAULT_MAX_PULSES,
            handle: Some(handle),
        })
    }

    #[must_use]
    pub fn with_max_pulses(mut self, max_pulses: usize) -> Self {
        self.max_pulses = max_pulses;
        self
    }
}

fn play_loop<L: OutputLines, C: Clock>(
    mut lines: L,
    clock: C,
    rx: &Receiver<Command>,
    shared: &Shared,
) {
    while let Ok(cmd) = rx.recv() {
        let (id, generation, pulses) = match cmd {
            Command::Play {
                id,
                generation,
                pulses,
            } => (id, generation, pulses),
            Command::Shutdown => break,
        };
        let live = || shared.generation.load(Ordering::Acquire) == generation;
        if !live() {
            trace!(%id, "skipping aborted wave");
            continue;
        }
        let mut deadline = clock.now();
        for p in &pulses {
            if !live() {
                break;
            }
            if let Err(e) = lines.write_bank(p.on, p.off) {
                error!(%id, error = %e, "wave player write failed");
                break;
            }
            deadline += Duration::from_micros(u64::from(p.delay_us));
            clock.sleep_until(deadline);
        }
        let mut pending = shared.pending();
        if live() && pending.front() == Some(&id) {
            pending.pop_front();
        }
        trace!(%id, "wave played");
    }
    debug!("wave player exiting");
}

impl WaveQueue for PlayerWaveQueue {
    fn submit_wave(&mut self, pulses: &[WavePulse]) -> HwResult<WaveId> {
        if pulses.is_empty() || pulses.len() > self.max_pulses {
            return Err(Box::new(HwError::QueueRejected(format!(
                "wave of {} pulses (capacity {})",
                pulses.len(),
                self.max_pulses
            ))));
        }
        let id = WaveId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        let generation = self.shared.generation.load(Ordering::Acquire);
        self.shared.pending().push_back(id);
        let cmd = Command::Play {
            id,
            generation,
            pulses: pulses.to_vec(),
        };
        if self.tx.send(cmd).is_err() {
            self.shared.pending().retain(|w| *w != id);
            return Err(Box::new(HwError::Disconnected));
        }
        Ok(id)
    }

    fn current_wave(&mut self) -> HwResult<Option<WaveId>> {
        Ok(self.shared.pending().front().copied())
    }

    fn release_wave(&mut self, id: WaveId) -> HwResult<()> {
        if self.shared.pending().contains(&id) {
            return Err(Box::new(HwError::QueueRejected(format!(
                "{id} released while still queued"
            ))));
        }
        Ok(())
    }

    fn abort(&mut self) -> HwResult<()> {
        let mut pending = self.shared.pending();
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        pending.clear();
        Ok(())
    }
}

impl Drop for PlayerWaveQueue {
    fn drop(&mut self) {
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        let _ = self.tx.send(Command::Shutdown);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("wave player thread panicked");
        }
    }
}
