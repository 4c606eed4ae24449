//! Memory areas and allocation.
//!
//! A [`MemoryArea`] is a cheap, cloneable handle. The three kinds share one
//! representation and differ only in how their objects are owned:
//!
//! - **heap** objects are owned by their handles and freed when the last
//!   handle goes away;
//! - **immortal** objects are owned by the area and never freed;
//! - **scoped** objects are owned by the area and freed together when its
//!   reference count returns to zero.
//!
//! Allocation charges `size_of::<T>()` bytes (times the element count for
//! arrays) against the area's maximum size. A request that does not fit is
//! rejected whole.

use core::fmt;
use std::any::Any;
use std::mem;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, trace};
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};

use crate::error::{MemoryError, MemoryResult};
use crate::reference::{AreaRef, RefValue};
use crate::scoped::{ParentLink, ScopeState, ScopedMemory};
use crate::stack;

static NEXT_AREA_ID: AtomicU64 = AtomicU64::new(1);

static HEAP: Lazy<MemoryArea> =
    Lazy::new(|| MemoryArea::create(AreaKind::Heap, "heap".into(), AreaSize::unbounded(), None));

static IMMORTAL: Lazy<MemoryArea> = Lazy::new(|| {
    MemoryArea::create(
        AreaKind::Immortal,
        "immortal".into(),
        AreaSize::unbounded(),
        None,
    )
});

/// Logic run when an area is entered without an explicit closure.
pub type AreaLogic = Arc<dyn Fn() + Send + Sync>;

/// Process-unique identifier of a memory area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AreaId(pub u64);

impl AreaId {
    fn next() -> Self {
        Self(NEXT_AREA_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for AreaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "area#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AreaKind {
    Heap,
    Immortal,
    Scoped,
}

/// Initial and maximum size of an area in bytes.
///
/// A fixed area has `initial == maximum`; a growable one may consume up to
/// `maximum`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AreaSize {
    pub initial: usize,
    pub maximum: usize,
}

impl AreaSize {
    pub const fn fixed(bytes: usize) -> Self {
        Self {
            initial: bytes,
            maximum: bytes,
        }
    }

    pub fn growable(initial: usize, maximum: usize) -> MemoryResult<Self> {
        if maximum < initial {
            return Err(MemoryError::InvalidSize { initial, maximum });
        }
        Ok(Self { initial, maximum })
    }

    pub const fn unbounded() -> Self {
        Self {
            initial: 0,
            maximum: usize::MAX,
        }
    }

    pub const fn is_growable(&self) -> bool {
        self.maximum > self.initial
    }
}

/// Snapshot of an area's accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AreaStats {
    pub size: usize,
    pub maximum: usize,
    pub consumed: usize,
    pub remaining: usize,
    /// Highest consumption since creation.
    pub peak: usize,
    /// Objects currently owned by the area.
    pub objects: usize,
    /// Number of completed reclamations.
    pub reclaimed: u64,
}

impl AreaStats {
    /// Consumption as a percentage of the maximum size (0-100).
    pub fn utilization(&self) -> u8 {
        if self.maximum == 0 {
            0
        } else {
            ((self.consumed as u128 * 100) / self.maximum as u128) as u8
        }
    }
}

pub(crate) struct AreaInner {
    pub(crate) id: AreaId,
    pub(crate) kind: AreaKind,
    name: String,
    size: AreaSize,
    consumed: AtomicUsize,
    peak: AtomicUsize,
    generation: AtomicU64,
    logic: Option<AreaLogic>,
    objects: Mutex<Vec<Arc<dyn Any + Send + Sync>>>,
    pub(crate) scope: Mutex<ScopeState>,
    /// Woken on every zero-crossing and at the end of reclamation.
    pub(crate) joiners: Condvar,
    /// Woken once per zero-crossing for `join_and_enter`.
    pub(crate) enterers: Condvar,
}

/// Handle to a memory area.
#[derive(Clone)]
pub struct MemoryArea {
    pub(crate) inner: Arc<AreaInner>,
}

impl MemoryArea {
    /// The garbage-collected heap area.
    pub fn heap() -> Self {
        HEAP.clone()
    }

    /// The immortal area; objects allocated here are never reclaimed.
    pub fn immortal() -> Self {
        IMMORTAL.clone()
    }

    /// The current allocation context of the calling thread.
    pub fn current() -> Self {
        stack::current_area()
    }

    pub(crate) fn create(
        kind: AreaKind,
        name: String,
        size: AreaSize,
        logic: Option<AreaLogic>,
    ) -> Self {
        let id = AreaId::next();
        trace!("created {kind:?} {id} ({name}) size={size:?}");
        Self {
            inner: Arc::new(AreaInner {
                id,
                kind,
                name,
                size,
                consumed: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                generation: AtomicU64::new(0),
                logic,
                objects: Mutex::new(Vec::new()),
                scope: Mutex::new(ScopeState::default()),
                joiners: Condvar::new(),
                enterers: Condvar::new(),
            }),
        }
    }

    pub fn id(&self) -> AreaId {
        self.inner.id
    }

    pub fn kind(&self) -> AreaKind {
        self.inner.kind
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_heap(&self) -> bool {
        self.inner.kind == AreaKind::Heap
    }

    pub fn is_immortal(&self) -> bool {
        self.inner.kind == AreaKind::Immortal
    }

    pub fn is_scoped(&self) -> bool {
        self.inner.kind == AreaKind::Scoped
    }

    /// Scoped view of this area, if it is one.
    pub fn as_scoped(&self) -> Option<ScopedMemory> {
        self.is_scoped().then(|| ScopedMemory::from_area(self.clone()))
    }

    pub fn logic(&self) -> Option<AreaLogic> {
        self.inner.logic.clone()
    }

    /// Current size of the backing store.
    pub fn size(&self) -> usize {
        let consumed = self.memory_consumed();
        if self.inner.size.is_growable() {
            self.inner.size.initial.max(consumed)
        } else {
            self.inner.size.initial
        }
    }

    pub fn maximum_size(&self) -> usize {
        self.inner.size.maximum
    }

    /// Bytes charged to this area.
    ///
    /// Exact for scoped and immortal areas. For the heap this is the total
    /// ever allocated through this API.
    pub fn memory_consumed(&self) -> usize {
        self.inner.consumed.load(Ordering::Acquire)
    }

    pub fn memory_remaining(&self) -> usize {
        self.inner
            .size
            .maximum
            .saturating_sub(self.memory_consumed())
    }

    pub fn stats(&self) -> AreaStats {
        let consumed = self.memory_consumed();
        AreaStats {
            size: self.size(),
            maximum: self.inner.size.maximum,
            consumed,
            remaining: self.inner.size.maximum.saturating_sub(consumed),
            peak: self.inner.peak.load(Ordering::Acquire),
            objects: self.inner.objects.lock().len(),
            reclaimed: self.inner.scope.lock().reclaimed,
        }
    }

    /// Reclamation generation; bumped every time a scoped area is emptied.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Runs `logic` with this area as the allocation context.
    ///
    /// The area is pushed on the calling thread's scope stack for the
    /// duration of `logic` and popped on every exit path, including
    /// unwinding. Scoped areas are reference counted and subject to the
    /// single-parent rule.
    pub fn enter<R>(&self, logic: impl FnOnce() -> R) -> MemoryResult<R> {
        let _frame = self.push()?;
        Ok(logic())
    }

    /// Enters the area and runs the logic it was constructed with.
    pub fn enter_default(&self) -> MemoryResult<()> {
        let logic = self.logic().ok_or(MemoryError::NoLogic(self.id()))?;
        self.enter(|| logic())
    }

    /// Runs `logic` with this area as the allocation context without
    /// touching its reference count.
    ///
    /// A scoped area must already be on the caller's scope stack; while
    /// `logic` runs, the stack is cut back to that area. For heap and
    /// immortal the stack temporarily holds only this area.
    pub fn execute_in_area<R>(&self, logic: impl FnOnce() -> R) -> MemoryResult<R> {
        let _borrow = stack::borrow_frames(self)?;
        Ok(logic())
    }

    /// Allocates `value` in this area.
    pub fn allocate<T: Send + Sync + 'static>(&self, value: T) -> MemoryResult<AreaRef<T>> {
        self.reserve(mem::size_of::<T>())?;
        Ok(self.store(Arc::new(value)))
    }

    /// Allocates an array of `len` elements produced by `init`.
    pub fn allocate_array<T, F>(&self, len: usize, init: F) -> MemoryResult<AreaRef<Vec<T>>>
    where
        T: Send + Sync + 'static,
        F: FnMut(usize) -> T,
    {
        let bytes = mem::size_of::<T>()
            .checked_mul(len)
            .ok_or(MemoryError::OutOfMemory {
                area: self.id(),
                requested: usize::MAX,
                remaining: self.memory_remaining(),
            })?;
        self.reserve(bytes)?;
        let items: Vec<T> = (0..len).map(init).collect();
        Ok(self.store(Arc::new(items)))
    }

    /// Whether an object in this area may hold a reference to an object in
    /// `target`.
    ///
    /// Heap and immortal objects are referenceable from anywhere. A scoped
    /// object is referenceable only from its own area or from areas nested
    /// inside it.
    pub fn can_reference(&self, target: &MemoryArea) -> bool {
        if !target.is_scoped() || self == target {
            return true;
        }
        if !self.is_scoped() {
            return false;
        }
        let mut cursor = self.parent_area();
        while let Some(area) = cursor {
            if &area == target {
                return true;
            }
            cursor = area.parent_area();
        }
        false
    }

    pub fn check_assignment(&self, target: &MemoryArea) -> MemoryResult<()> {
        if self.can_reference(target) {
            Ok(())
        } else {
            Err(MemoryError::IllegalAssignment {
                holder: self.id(),
                target: target.id(),
            })
        }
    }

    pub(crate) fn parent_area(&self) -> Option<MemoryArea> {
        match &self.inner.scope.lock().parent {
            Some(ParentLink::Area(parent)) => Some(parent.clone()),
            _ => None,
        }
    }

    pub(crate) fn push(&self) -> MemoryResult<stack::FrameGuard> {
        stack::check_heap_access(self)?;
        let counted = if self.is_scoped() {
            let current = stack::innermost_scope();
            self.claim(current)?;
            true
        } else {
            false
        };
        debug!("entering {self}");
        Ok(stack::push_frame(self.clone(), counted))
    }

    fn reserve(&self, bytes: usize) -> MemoryResult<()> {
        stack::check_allocation(self)?;
        stack::check_budget(self, bytes)?;

        let maximum = self.inner.size.maximum;
        let consumed = self
            .inner
            .consumed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|total| *total <= maximum)
            })
            .map_err(|used| MemoryError::OutOfMemory {
                area: self.id(),
                requested: bytes,
                remaining: maximum.saturating_sub(used),
            })?;
        self.inner
            .peak
            .fetch_max(consumed + bytes, Ordering::AcqRel);

        stack::record_budget(self, bytes);
        Ok(())
    }

    fn store<T: Send + Sync + 'static>(&self, value: Arc<T>) -> AreaRef<T> {
        let generation = self.generation();
        let value = match self.inner.kind {
            AreaKind::Heap => RefValue::Owned(value),
            AreaKind::Immortal | AreaKind::Scoped => {
                let weak = Arc::downgrade(&value);
                self.inner.objects.lock().push(value);
                RefValue::Held(weak)
            }
        };
        AreaRef::new(self.clone(), generation, value)
    }

    /// Drops every object owned by the area and resets its accounting.
    pub(crate) fn reclaim_objects(&self) {
        let objects = mem::take(&mut *self.inner.objects.lock());
        let count = objects.len();
        drop(objects);
        self.inner.consumed.store(0, Ordering::Release);
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        debug!("reclaimed {self}: {count} objects");
    }
}

impl PartialEq for MemoryArea {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for MemoryArea {}

impl fmt::Debug for MemoryArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryArea")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("name", &self.inner.name)
            .field("consumed", &self.memory_consumed())
            .field("maximum", &self.inner.size.maximum)
            .finish()
    }
}

impl fmt::Display for MemoryArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.inner.id, self.inner.name)
    }
}

/// Something that hands out storage from a memory area.
pub trait Allocatable {
    fn memory_area(&self) -> &MemoryArea;

    fn allocate_value<T: Send + Sync + 'static>(&self, value: T) -> MemoryResult<AreaRef<T>> {
        self.memory_area().allocate(value)
    }

    fn remaining(&self) -> usize {
        self.memory_area().memory_remaining()
    }
}

impl Allocatable for MemoryArea {
    fn memory_area(&self) -> &MemoryArea {
        self
    }
}

impl Allocatable for ScopedMemory {
    fn memory_area(&self) -> &MemoryArea {
        self.area()
    }
}
