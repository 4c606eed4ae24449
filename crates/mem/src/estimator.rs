use std::mem;

use crate::error::{MemoryError, MemoryResult};

/// Accumulates the size of the objects a scoped area is expected to hold.
///
/// Sizes are charged the same way [`MemoryArea::allocate`] charges them, so
/// an area built from an estimate fits exactly the reserved objects.
///
/// [`MemoryArea::allocate`]: crate::MemoryArea::allocate
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SizeEstimator {
    bytes: usize,
    overflowed: bool,
}

impl SizeEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves room for `count` objects of type `T`.
    pub fn reserve<T>(&mut self, count: usize) -> &mut Self {
        self.add(mem::size_of::<T>().checked_mul(count))
    }

    /// Reserves room for one array of `len` elements of type `T`.
    pub fn reserve_array<T>(&mut self, len: usize) -> &mut Self {
        self.reserve::<T>(len)
    }

    pub fn reserve_bytes(&mut self, bytes: usize) -> &mut Self {
        self.add(Some(bytes))
    }

    /// Adds everything reserved by `other`.
    pub fn reserve_estimator(&mut self, other: &SizeEstimator) -> &mut Self {
        if other.overflowed {
            self.overflowed = true;
            return self;
        }
        self.add(Some(other.bytes))
    }

    pub fn size(&self) -> MemoryResult<usize> {
        if self.overflowed {
            Err(MemoryError::EstimateOverflow)
        } else {
            Ok(self.bytes)
        }
    }

    fn add(&mut self, bytes: Option<usize>) -> &mut Self {
        match bytes.and_then(|bytes| self.bytes.checked_add(bytes)) {
            Some(total) => self.bytes = total,
            None => self.overflowed = true,
        }
        self
    }
}
