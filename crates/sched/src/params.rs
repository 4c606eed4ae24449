//! Scheduling parameters.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Set of processors a schedulable may run on, as a bit mask.
///
/// Recorded for the scheduler; this crate does not pin threads.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Affinity(u64);

impl Affinity {
    pub const fn any() -> Self {
        Self(u64::MAX)
    }

    pub const fn single(cpu: u8) -> Self {
        Self(1 << (cpu % 64))
    }

    pub const fn from_mask(mask: u64) -> Self {
        Self(mask)
    }

    pub const fn mask(&self) -> u64 {
        self.0
    }

    pub const fn contains(&self, cpu: u8) -> bool {
        cpu < 64 && self.0 & (1 << cpu) != 0
    }

    pub fn cpus(&self) -> impl Iterator<Item = u8> + '_ {
        (0..64u8).filter(move |cpu| self.contains(*cpu))
    }
}

impl Default for Affinity {
    fn default() -> Self {
        Self::any()
    }
}

impl fmt::Debug for Affinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Affinity({:#x})", self.0)
    }
}

/// Priority and processor affinity of a schedulable.
///
/// Higher numbers mean higher priority. The valid range is fixed by the
/// scheduler the schedulable is added to.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PriorityParameters {
    pub priority: u8,
    pub affinity: Affinity,
}

impl PriorityParameters {
    pub const fn new(priority: u8) -> Self {
        Self {
            priority,
            affinity: Affinity::any(),
        }
    }

    pub const fn with_affinity(mut self, affinity: Affinity) -> Self {
        self.affinity = affinity;
        self
    }
}

impl Default for PriorityParameters {
    fn default() -> Self {
        Self::new(1)
    }
}
