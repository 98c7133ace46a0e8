//! Hardware seams for the stepper motion core.
//!
//! Engines in `stepper_core` never talk to a GPIO library directly; they drive
//! an [`OutputLines`] implementation (direct writes) or a [`WaveQueue`]
//! implementation (pre-timed pulse batches that run autonomously once
//! submitted). Errors cross these boundaries boxed, so backends are free to use
//! their own error types.

pub mod clock;
pub mod wave;

pub use clock::{Clock, MonotonicClock};
pub use wave::{WaveId, WavePulse};

/// Error type used at every trait boundary in this crate.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
pub type HwResult<T> = Result<T, BoxError>;

/// A set of output lines (GPIO pins) driving the motor windings.
pub trait OutputLines {
    /// Binary write of a single line.
    fn write(&mut self, line: u8, high: bool) -> HwResult<()>;

    /// Proportional write of a single line, `0` = off, `255` = fully on.
    fn set_duty(&mut self, line: u8, duty: u8) -> HwResult<()>;

    /// Bank write: every line whose bit is in `set` goes high, then every line
    /// whose bit is in `clear` goes low.
    fn write_bank(&mut self, set: u32, clear: u32) -> HwResult<()>;

    /// Whether the underlying capability is reachable at all.
    fn is_connected(&self) -> bool {
        true
    }
}

/// A hardware pulse queue that plays submitted waves back to back, in
/// submission order, without further involvement from the caller.
pub trait WaveQueue {
    /// Queue one wave behind any already in flight.
    fn submit_wave(&mut self, pulses: &[WavePulse]) -> HwResult<WaveId>;

    /// The wave presently executing, or `None` when the queue is idle.
    fn current_wave(&mut self) -> HwResult<Option<WaveId>>;

    /// Free the resources held by a wave that has finished.
    fn release_wave(&mut self, id: WaveId) -> HwResult<()>;

    /// Stop transmission immediately and forget every queued wave.
    fn abort(&mut self) -> HwResult<()>;
}

impl<T: OutputLines + ?Sized> OutputLines for Box<T> {
    fn write(&mut self, line: u8, high: bool) -> HwResult<()> {
        (**self).write(line, high)
    }
    fn set_duty(&mut self, line: u8, duty: u8) -> HwResult<()> {
        (**self).set_duty(line, duty)
    }
    fn write_bank(&mut self, set: u32, clear: u32) -> HwResult<()> {
        (**self).write_bank(set, clear)
    }
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}

impl<T: WaveQueue + ?Sized> WaveQueue for Box<T> {
    fn submit_wave(&mut self, pulses: &[WavePulse]) -> HwResult<WaveId> {
        (**self).submit_wave(pulses)
    }
    fn current_wave(&mut self) -> HwResult<Option<WaveId>> {
        (**self).current_wave()
    }
    fn release_wave(&mut self, id: WaveId) -> HwResult<()> {
        (**self).release_wave(id)
    }
    fn abort(&mut self) -> HwResult<()> {
        (**self).abort()
    }
}
