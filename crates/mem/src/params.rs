//! Per-schedulable memory limits.

use core::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Limit value meaning "unconstrained".
pub const NO_MAX: Option<usize> = None;

/// Plain values of a [`MemoryParameters`] object.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLimits {
    /// Bytes the schedulable may allocate in its initial area.
    pub max_memory_area: Option<usize>,
    /// Bytes the schedulable may allocate in immortal memory.
    pub max_immortal: Option<usize>,
    /// Bytes per second; recorded but not enforced.
    pub allocation_rate: Option<usize>,
}

/// Memory budget shared by the schedulables it is attached to.
///
/// Clones share the same limits; a change through one handle is seen by
/// every schedulable using it.
#[derive(Clone, Default)]
pub struct MemoryParameters {
    limits: Arc<Mutex<MemoryLimits>>,
}

impl MemoryParameters {
    pub fn new(max_memory_area: Option<usize>, max_immortal: Option<usize>) -> Self {
        Self::from_limits(MemoryLimits {
            max_memory_area,
            max_immortal,
            allocation_rate: None,
        })
    }

    pub fn unconstrained() -> Self {
        Self::default()
    }

    pub fn from_limits(limits: MemoryLimits) -> Self {
        Self {
            limits: Arc::new(Mutex::new(limits)),
        }
    }

    pub fn with_allocation_rate(self, rate: Option<usize>) -> Self {
        self.set_allocation_rate(rate);
        self
    }

    pub fn limits(&self) -> MemoryLimits {
        *self.limits.lock()
    }

    pub fn max_memory_area(&self) -> Option<usize> {
        self.limits.lock().max_memory_area
    }

    pub fn max_immortal(&self) -> Option<usize> {
        self.limits.lock().max_immortal
    }

    pub fn allocation_rate(&self) -> Option<usize> {
        self.limits.lock().allocation_rate
    }

    pub fn set_max_memory_area(&self, limit: Option<usize>) {
        self.limits.lock().max_memory_area = limit;
    }

    pub fn set_max_immortal(&self, limit: Option<usize>) {
        self.limits.lock().max_immortal = limit;
    }

    pub fn set_allocation_rate(&self, rate: Option<usize>) {
        self.limits.lock().allocation_rate = rate;
    }

    /// Whether both handles share the same limits.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.limits, &other.limits)
    }
}

impl fmt::Debug for MemoryParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MemoryParameters").field(&self.limits()).finish()
    }
}
