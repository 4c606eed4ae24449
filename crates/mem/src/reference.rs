//! References to objects allocated in memory areas.
//!
//! An [`AreaRef`] remembers the area and the reclamation generation it was
//! allocated in. Objects in immortal and scoped areas are owned by the area;
//! the reference only holds a weak pointer, so once a scoped area is reclaimed
//! every outstanding reference into it reports
//! [`MemoryError::StaleReference`] instead of dangling.

use core::fmt;
use std::any::Any;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::area::MemoryArea;
use crate::error::{MemoryError, MemoryResult};
use crate::stack;

pub(crate) enum RefValue<T: ?Sized> {
    /// Heap objects live as long as some reference does.
    Owned(Arc<T>),
    /// Area-owned objects.
    Held(Weak<T>),
}

impl<T: ?Sized> Clone for RefValue<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Owned(value) => Self::Owned(Arc::clone(value)),
            Self::Held(value) => Self::Held(Weak::clone(value)),
        }
    }
}

/// Handle to an object allocated in a [`MemoryArea`].
pub struct AreaRef<T: ?Sized> {
    area: MemoryArea,
    generation: u64,
    value: RefValue<T>,
}

impl<T: ?Sized> AreaRef<T> {
    pub(crate) fn new(area: MemoryArea, generation: u64, value: RefValue<T>) -> Self {
        Self {
            area,
            generation,
            value,
        }
    }

    /// Area the object was allocated in.
    pub fn area(&self) -> &MemoryArea {
        &self.area
    }

    /// Whether the object still exists.
    pub fn is_live(&self) -> bool {
        match &self.value {
            RefValue::Owned(_) => true,
            RefValue::Held(weak) => {
                self.area.generation() == self.generation && weak.strong_count() > 0
            }
        }
    }

    /// Strong pointer to the object.
    ///
    /// Heap objects are refused to no-heap contexts.
    pub fn get(&self) -> MemoryResult<Arc<T>> {
        match &self.value {
            RefValue::Owned(value) => {
                if !stack::heap_allowed() {
                    return Err(MemoryError::HeapAccess);
                }
                Ok(Arc::clone(value))
            }
            RefValue::Held(weak) => {
                let stale = MemoryError::StaleReference {
                    area: self.area.id(),
                };
                if self.area.generation() != self.generation {
                    return Err(stale);
                }
                weak.upgrade().ok_or(stale)
            }
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> MemoryResult<R> {
        let value = self.get()?;
        Ok(f(&value))
    }
}

impl<T: Send + Sync + 'static> AreaRef<T> {
    pub(crate) fn erase(&self) -> AreaRef<dyn Any + Send + Sync> {
        let value = match &self.value {
            RefValue::Owned(value) => {
                RefValue::Owned(Arc::clone(value) as Arc<dyn Any + Send + Sync>)
            }
            RefValue::Held(weak) => {
                RefValue::Held(Weak::clone(weak) as Weak<dyn Any + Send + Sync>)
            }
        };
        AreaRef::new(self.area.clone(), self.generation, value)
    }
}

impl AreaRef<dyn Any + Send + Sync> {
    pub(crate) fn downcast<T: Send + Sync + 'static>(&self) -> MemoryResult<AreaRef<T>> {
        let value = match &self.value {
            RefValue::Owned(value) => RefValue::Owned(
                Arc::clone(value)
                    .downcast::<T>()
                    .map_err(|_| MemoryError::PortalType)?,
            ),
            RefValue::Held(weak) => {
                let strong = weak.upgrade().ok_or(MemoryError::StaleReference {
                    area: self.area.id(),
                })?;
                let typed = strong.downcast::<T>().map_err(|_| MemoryError::PortalType)?;
                RefValue::Held(Arc::downgrade(&typed))
            }
        };
        Ok(AreaRef::new(self.area.clone(), self.generation, value))
    }
}

impl<T: ?Sized> Clone for AreaRef<T> {
    fn clone(&self) -> Self {
        Self {
            area: self.area.clone(),
            generation: self.generation,
            value: self.value.clone(),
        }
    }
}

impl<T: ?Sized> fmt::Debug for AreaRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AreaRef")
            .field("area", &self.area.id())
            .field("generation", &self.generation)
            .field("live", &self.is_live())
            .finish()
    }
}

/// A reference field owned by an object in some area.
///
/// Every store is checked against the assignment rule: the slot may only
/// point at objects its owner's area can reference.
pub struct RefSlot<T> {
    owner: MemoryArea,
    value: Mutex<Option<AreaRef<T>>>,
}

impl<T> RefSlot<T> {
    /// Empty slot for an object living in `owner`.
    pub fn new_in(owner: &MemoryArea) -> Self {
        Self {
            owner: owner.clone(),
            value: Mutex::new(None),
        }
    }

    pub fn owner(&self) -> &MemoryArea {
        &self.owner
    }

    pub fn set(&self, target: &AreaRef<T>) -> MemoryResult<()> {
        self.owner.check_assignment(target.area())?;
        *self.value.lock() = Some(target.clone());
        Ok(())
    }

    pub fn get(&self) -> Option<AreaRef<T>> {
        self.value.lock().clone()
    }

    pub fn clear(&self) {
        self.value.lock().take();
    }
}

impl<T> fmt::Debug for RefSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefSlot")
            .field("owner", &self.owner.id())
            .field("value", &self.value.lock().as_ref().map(|r| r.area().id()))
            .finish()
    }
}
