use std::sync::atomic::{AtomicU64, Ordering};

/// An `f64` cell readable and writable from any thread without locking.
///
/// Stored as raw bits in an `AtomicU64`; every load observes some value that
/// was stored in full, never a torn mix of two writes.
#[derive(Debug, Default)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(v: f64) -> Self {
        Self(AtomicU64::new(v.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn store(&self, v: f64) {
        self.0.store(v.to_bits(), Ordering::Release);
    }
}
