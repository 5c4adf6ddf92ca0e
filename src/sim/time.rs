//! Virtual time for the simulated mesh.
//!
//! Time advances only when the event queue dispatches; nothing reads the
//! wall clock.

use std::fmt;

/// A logical instant in simulation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualTime(u64);

impl VirtualTime {
    pub const ZERO: VirtualTime = VirtualTime(0);

    #[inline]
    pub fn new(ticks: u64) -> Self {
        VirtualTime(ticks)
    }

    #[inline]
    pub fn ticks(self) -> u64 {
        self.0
    }

    /// The instant `delay` ticks after `self`, saturating at the end of time.
    #[inline]
    pub fn plus(self, delay: u64) -> VirtualTime {
        VirtualTime(self.0.saturating_add(delay))
    }

    /// Ticks elapsed since `earlier`, `None` if `earlier` is in the future.
    #[inline]
    pub fn duration_since(self, earlier: VirtualTime) -> Option<u64> {
        self.0.checked_sub(earlier.0)
    }
}

impl fmt::Display for VirtualTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T={}", self.0)
    }
}
