//! Scoped regions.
//!
//! A scoped area moves between two states:
//!
//! - **unreferenced**: reference count zero, no parent, no objects;
//! - **referenced**: reference count above zero, parent fixed.
//!
//! The first entry records the caller's innermost scope as the parent.
//! Later entries must come from that same parent (the single-parent rule),
//! so an area can only ever sit in one lineage of nested scopes. When the
//! count drops back to zero the area is reclaimed: its objects and portal are
//! dropped, accounting is reset, and exactly one `join_and_enter` waiter is
//! woken.

use core::fmt;
use core::ops::Deref;
use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, trace};

use rts_time::HighResolutionTime;

use crate::area::{AreaId, AreaKind, AreaLogic, AreaSize, MemoryArea};
use crate::error::{MemoryError, MemoryResult};
use crate::estimator::SizeEstimator;
use crate::reference::AreaRef;
use crate::stack;

/// Parent of a scoped area as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeParent {
    /// Entered from a context with no scoped area on its stack.
    Primordial,
    Area(AreaId),
}

impl fmt::Display for ScopeParent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primordial => write!(f, "primordial scope"),
            Self::Area(id) => write!(f, "{id}"),
        }
    }
}

#[derive(Clone)]
pub(crate) enum ParentLink {
    Primordial,
    Area(MemoryArea),
}

impl ParentLink {
    pub(crate) fn public(&self) -> ScopeParent {
        match self {
            Self::Primordial => ScopeParent::Primordial,
            Self::Area(area) => ScopeParent::Area(area.id()),
        }
    }
}

impl PartialEq for ParentLink {
    fn eq(&self, other: &Self) -> bool {
        self.public() == other.public()
    }
}

#[derive(Default)]
pub(crate) struct ScopeState {
    pub(crate) ref_count: usize,
    pub(crate) parent: Option<ParentLink>,
    pub(crate) portal: Option<AreaRef<dyn Any + Send + Sync>>,
    pub(crate) reclaiming: bool,
    pub(crate) reclaimed: u64,
}

impl ScopeState {
    fn busy(&self) -> bool {
        self.ref_count > 0 || self.reclaiming
    }
}

impl MemoryArea {
    /// Takes one reference on a scoped area entered from `current`.
    ///
    /// Blocks while the area is being reclaimed.
    pub(crate) fn claim(&self, current: ParentLink) -> MemoryResult<()> {
        let mut state = self.inner.scope.lock();
        while state.reclaiming {
            self.inner.joiners.wait(&mut state);
        }
        self.claim_locked(&mut state, current)
    }

    fn claim_locked(&self, state: &mut ScopeState, current: ParentLink) -> MemoryResult<()> {
        match &state.parent {
            None => state.parent = Some(current),
            Some(parent) if *parent == current => {}
            Some(parent) => {
                return Err(MemoryError::ScopedCycle {
                    area: self.id(),
                    parent: parent.public(),
                    current: current.public(),
                })
            }
        }
        state.ref_count += 1;
        trace!("{self} rc -> {}", state.ref_count);
        Ok(())
    }

    /// Takes a reference without a parent check.
    ///
    /// Only valid for areas already referenced by the caller's lineage, as
    /// when a new schedulable inherits its creator's stack.
    pub(crate) fn retain(&self) {
        let mut state = self.inner.scope.lock();
        state.ref_count += 1;
        trace!("{self} retained, rc -> {}", state.ref_count);
    }

    /// Drops one reference, reclaiming the area on the last one.
    pub(crate) fn release(&self) {
        let mut state = self.inner.scope.lock();
        debug_assert!(state.ref_count > 0, "release without a matching claim");
        state.ref_count = state.ref_count.saturating_sub(1);
        trace!("{self} rc -> {}", state.ref_count);
        if state.ref_count > 0 {
            return;
        }

        state.reclaiming = true;
        let portal = state.portal.take();
        drop(state);

        drop(portal);
        self.reclaim_objects();

        let mut state = self.inner.scope.lock();
        state.reclaiming = false;
        state.parent = None;
        state.reclaimed += 1;
        drop(state);

        self.inner.joiners.notify_all();
        self.inner.enterers.notify_one();
    }
}

/// A region reclaimed when its reference count returns to zero.
#[derive(Clone, PartialEq, Eq)]
pub struct ScopedMemory(MemoryArea);

impl ScopedMemory {
    /// Fixed-size scoped area of `bytes`.
    pub fn new(bytes: usize) -> MemoryResult<Self> {
        Self::builder(bytes).build()
    }

    /// Fixed-size scoped area sized by an estimator.
    pub fn from_estimator(estimator: &SizeEstimator) -> MemoryResult<Self> {
        Self::builder(estimator.size()?).build()
    }

    pub fn builder(bytes: usize) -> ScopedMemoryBuilder {
        ScopedMemoryBuilder::new(bytes)
    }

    pub(crate) fn from_area(area: MemoryArea) -> Self {
        Self(area)
    }

    pub fn area(&self) -> &MemoryArea {
        &self.0
    }

    pub fn reference_count(&self) -> usize {
        self.0.inner.scope.lock().ref_count
    }

    /// Parent recorded by the current lineage, `None` while unreferenced.
    pub fn parent(&self) -> Option<ScopeParent> {
        self.0.inner.scope.lock().parent.as_ref().map(ParentLink::public)
    }

    /// Whether the area is unreferenced and not being reclaimed.
    pub fn is_reclaimable(&self) -> bool {
        !self.0.inner.scope.lock().busy()
    }

    pub fn reclaim_count(&self) -> u64 {
        self.0.inner.scope.lock().reclaimed
    }

    /// Blocks until the reference count reaches zero and reclamation has
    /// finished. Returns at once when the area is unused.
    pub fn join(&self) {
        let mut state = self.0.inner.scope.lock();
        while state.busy() {
            self.0.inner.joiners.wait(&mut state);
        }
    }

    /// Like [`join`](Self::join) but gives up after `timeout`.
    ///
    /// Returns `true` when the area became unreferenced.
    pub fn join_timeout(&self, timeout: &HighResolutionTime) -> MemoryResult<bool> {
        let Some(deadline) = wait_deadline(timeout)? else {
            self.join();
            return Ok(true);
        };
        let mut state = self.0.inner.scope.lock();
        while state.busy() {
            if self
                .0
                .inner
                .joiners
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return Ok(!state.busy());
            }
        }
        Ok(true)
    }

    /// Waits for the area to become unreferenced, then enters it.
    ///
    /// The wait and the entry form one critical section: no other
    /// `join_and_enter` can slip in between, and each zero-crossing admits
    /// exactly one waiter.
    pub fn join_and_enter<R>(&self, logic: impl FnOnce() -> R) -> MemoryResult<R> {
        let _frame = self.join_and_claim(None)?;
        Ok(logic())
    }

    /// Bounded [`join_and_enter`](Self::join_and_enter).
    ///
    /// When `timeout` elapses first the area is entered anyway, possibly
    /// while other contexts are still inside it. Callers must not rely on
    /// this variant for mutual exclusion.
    pub fn join_and_enter_timeout<R>(
        &self,
        timeout: &HighResolutionTime,
        logic: impl FnOnce() -> R,
    ) -> MemoryResult<R> {
        let deadline = wait_deadline(timeout)?;
        let _frame = self.join_and_claim(deadline)?;
        Ok(logic())
    }

    fn join_and_claim(&self, deadline: Option<Instant>) -> MemoryResult<stack::FrameGuard> {
        let current = stack::innermost_scope();
        let inner = &self.0.inner;
        {
            let mut state = inner.scope.lock();
            while state.busy() {
                match deadline {
                    None => inner.enterers.wait(&mut state),
                    Some(at) => {
                        if inner.enterers.wait_until(&mut state, at).timed_out() {
                            debug!("{} join_and_enter timed out, entering anyway", self.0);
                            break;
                        }
                    }
                }
            }
            while state.reclaiming {
                inner.joiners.wait(&mut state);
            }
            if let Err(err) = self.0.claim_locked(&mut state, current) {
                drop(state);
                // pass the wake-up on so the next waiter is not stranded
                inner.enterers.notify_one();
                return Err(err);
            }
        }
        debug!("entering {} after join", self.0);
        Ok(stack::push_frame(self.0.clone(), true))
    }

    /// Stores `object` in the portal.
    ///
    /// The area must be on the caller's scope stack, and the object must be
    /// referenceable both from this area and from the caller's current
    /// allocation context.
    pub fn set_portal<T: Send + Sync + 'static>(&self, object: &AreaRef<T>) -> MemoryResult<()> {
        self.require_on_stack()?;
        self.0.check_assignment(object.area())?;
        MemoryArea::current().check_assignment(object.area())?;
        self.0.inner.scope.lock().portal = Some(object.erase());
        Ok(())
    }

    /// Reads the portal.
    ///
    /// The object must be referenceable from the caller's current
    /// allocation context.
    pub fn portal<T: Send + Sync + 'static>(&self) -> MemoryResult<Option<AreaRef<T>>> {
        self.require_on_stack()?;
        let entry = self.0.inner.scope.lock().portal.clone();
        let Some(entry) = entry else {
            return Ok(None);
        };
        MemoryArea::current().check_assignment(entry.area())?;
        entry.downcast::<T>().map(Some)
    }

    pub fn clear_portal(&self) -> MemoryResult<()> {
        self.require_on_stack()?;
        self.0.inner.scope.lock().portal = None;
        Ok(())
    }

    fn require_on_stack(&self) -> MemoryResult<()> {
        if stack::is_on_stack(&self.0) {
            Ok(())
        } else {
            Err(MemoryError::InaccessibleArea(self.0.id()))
        }
    }
}

impl Deref for ScopedMemory {
    type Target = MemoryArea;

    fn deref(&self) -> &MemoryArea {
        &self.0
    }
}

impl From<ScopedMemory> for MemoryArea {
    fn from(scoped: ScopedMemory) -> Self {
        scoped.0
    }
}

impl fmt::Debug for ScopedMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedMemory")
            .field("area", &self.0)
            .field("ref_count", &self.reference_count())
            .finish()
    }
}

/// Builder for [`ScopedMemory`].
pub struct ScopedMemoryBuilder {
    name: String,
    initial: usize,
    maximum: Option<usize>,
    logic: Option<AreaLogic>,
}

impl ScopedMemoryBuilder {
    fn new(initial: usize) -> Self {
        Self {
            name: "scoped".into(),
            initial,
            maximum: None,
            logic: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Makes the area growable up to `maximum` bytes.
    pub fn maximum(mut self, maximum: usize) -> Self {
        self.maximum = Some(maximum);
        self
    }

    /// Logic run by [`MemoryArea::enter_default`].
    pub fn logic<F>(mut self, logic: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.logic = Some(Arc::new(logic));
        self
    }

    pub fn build(self) -> MemoryResult<ScopedMemory> {
        let size = match self.maximum {
            Some(maximum) => AreaSize::growable(self.initial, maximum)?,
            None => AreaSize::fixed(self.initial),
        };
        let area = MemoryArea::create(AreaKind::Scoped, self.name, size, self.logic);
        Ok(ScopedMemory(area))
    }
}

/// Converts a wait bound into a real-time deadline. Elapsed bounds expire
/// now; bounds too far out to represent mean no deadline.
fn wait_deadline(timeout: &HighResolutionTime) -> MemoryResult<Option<Instant>> {
    let now = Instant::now();
    let relative = timeout.to_relative(timeout.clock())?;
    if !relative.is_positive() {
        return Ok(Some(now));
    }
    Ok(relative.to_duration().and_then(|budget| now.checked_add(budget)))
}
