//! Hardware-level pulse and wave handle types.

use std::fmt;

/// One timed transition in a wave: raise `on`, lower `off`, then wait
/// `delay_us` before the next pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WavePulse {
    pub on: u32,
    pub off: u32,
    pub delay_us: u32,
}

impl WavePulse {
    #[inline]
    pub const fn new(on: u32, off: u32, delay_us: u32) -> Self {
        Self { on, off, delay_us }
    }
}

/// Opaque handle for a submitted wave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaveId(pub u32);

impl fmt::Display for WaveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wave#{}", self.0)
    }
}

/// Total span of a wave in microseconds.
pub fn span_us(pulses: &[WavePulse]) -> u64 {
    pulses.iter().map(|p| u64::from(p.delay_us)).sum()
}
