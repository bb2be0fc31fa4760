use embedded_hal::delay::DelayNs;
use portable_atomic::{AtomicBool, Ordering};

use super::{Timeout, poll_until};

/// Binary ownership token.
///
/// The gate is either available or held. Taking it never spins on a lock,
/// so [`Gate::give`] and [`Gate::try_take`] are usable from interrupt context.
pub struct Gate {
    available: AtomicBool,
}

impl Gate {
    /// Creates a gate that is held, i.e. unavailable.
    pub const fn new() -> Self {
        Self {
            available: AtomicBool::new(false),
        }
    }

    /// Makes the gate available. Giving an available gate has no effect.
    pub fn give(&self) {
        self.available.store(true, Ordering::Release);
    }

    /// Takes the gate if it is available.
    pub fn try_take(&self) -> bool {
        self.available
            .compare_exchange(true, false, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Takes the gate, waiting for it up to `timeout`.
    pub fn take(&self, timeout: Timeout, delay: &mut impl DelayNs) -> bool {
        poll_until(timeout, delay, || self.try_take().then_some(())).is_some()
    }

    /// Whether the gate can currently be taken.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}
