//! Per-thread scope stacks.
//!
//! Every thread owns an execution context: the stack of areas it has
//! entered, whether it may touch the heap, and the memory budget of the
//! schedulable running on it (if any). The bottom frame is always heap or
//! immortal; the top frame is the current allocation context.

use core::cell::RefCell;
use core::fmt;
use std::mem;

use log::{debug, warn};

use crate::area::MemoryArea;
use crate::error::{MemoryError, MemoryResult};
use crate::params::MemoryParameters;
use crate::scoped::ParentLink;

thread_local! {
    static CONTEXT: RefCell<ExecutionContext> = RefCell::new(ExecutionContext::default());
}

struct ExecutionContext {
    frames: Vec<MemoryArea>,
    heap_allowed: bool,
    budget: Option<Budget>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            frames: vec![MemoryArea::heap()],
            heap_allowed: true,
            budget: None,
        }
    }
}

struct Budget {
    params: MemoryParameters,
    initial: MemoryArea,
    area_used: usize,
    area_generation: u64,
    immortal_used: usize,
}

impl Budget {
    fn new(params: MemoryParameters, initial: MemoryArea) -> Self {
        let area_generation = initial.generation();
        Self {
            params,
            initial,
            area_used: 0,
            area_generation,
            immortal_used: 0,
        }
    }

    /// Usage in the initial area, reset whenever the area has been reclaimed.
    fn area_used(&self) -> usize {
        if self.initial.generation() == self.area_generation {
            self.area_used
        } else {
            0
        }
    }

    fn check(&self, area: &MemoryArea, bytes: usize) -> MemoryResult<()> {
        let limits = self.params.limits();
        if *area == self.initial {
            if let Some(limit) = limits.max_memory_area {
                exceeds(area, self.area_used(), bytes, limit)?;
            }
        }
        if area.is_immortal() {
            if let Some(limit) = limits.max_immortal {
                exceeds(area, self.immortal_used, bytes, limit)?;
            }
        }
        Ok(())
    }

    fn record(&mut self, area: &MemoryArea, bytes: usize) {
        if *area == self.initial {
            let generation = self.initial.generation();
            if generation != self.area_generation {
                self.area_generation = generation;
                self.area_used = 0;
            }
            self.area_used = self.area_used.saturating_add(bytes);
        }
        if area.is_immortal() {
            self.immortal_used = self.immortal_used.saturating_add(bytes);
        }
    }
}

fn exceeds(area: &MemoryArea, used: usize, requested: usize, limit: usize) -> MemoryResult<()> {
    if used.saturating_add(requested) > limit {
        warn!("{area}: budget of {limit} bytes exceeded ({used} used, {requested} requested)");
        return Err(MemoryError::BudgetExceeded {
            area: area.id(),
            requested,
            used,
            limit,
        });
    }
    Ok(())
}

pub(crate) fn current_area() -> MemoryArea {
    CONTEXT.with(|ctx| {
        ctx.borrow()
            .frames
            .last()
            .cloned()
            .unwrap_or_else(MemoryArea::heap)
    })
}

pub(crate) fn is_on_stack(area: &MemoryArea) -> bool {
    CONTEXT.with(|ctx| ctx.borrow().frames.contains(area))
}

/// Innermost scoped area of the calling thread, or the primordial scope.
pub(crate) fn innermost_scope() -> ParentLink {
    CONTEXT.with(|ctx| {
        ctx.borrow()
            .frames
            .iter()
            .rev()
            .find(|area| area.is_scoped())
            .cloned()
            .map_or(ParentLink::Primordial, ParentLink::Area)
    })
}

pub(crate) fn check_heap_access(area: &MemoryArea) -> MemoryResult<()> {
    if area.is_heap() && !heap_allowed() {
        return Err(MemoryError::HeapAccess);
    }
    Ok(())
}

pub(crate) fn check_allocation(area: &MemoryArea) -> MemoryResult<()> {
    check_heap_access(area)?;
    if area.is_scoped() && !is_on_stack(area) {
        return Err(MemoryError::InaccessibleArea(area.id()));
    }
    Ok(())
}

pub(crate) fn check_budget(area: &MemoryArea, bytes: usize) -> MemoryResult<()> {
    CONTEXT.with(|ctx| match &ctx.borrow().budget {
        Some(budget) => budget.check(area, bytes),
        None => Ok(()),
    })
}

pub(crate) fn record_budget(area: &MemoryArea, bytes: usize) {
    CONTEXT.with(|ctx| {
        if let Some(budget) = ctx.borrow_mut().budget.as_mut() {
            budget.record(area, bytes);
        }
    });
}

/// Whether the calling thread may touch the heap.
pub fn heap_allowed() -> bool {
    CONTEXT.with(|ctx| ctx.borrow().heap_allowed)
}

pub(crate) fn push_frame(area: MemoryArea, counted: bool) -> FrameGuard {
    CONTEXT.with(|ctx| ctx.borrow_mut().frames.push(area.clone()));
    FrameGuard { area, counted }
}

/// Pops its frame on drop and releases the scoped reference it holds.
pub(crate) struct FrameGuard {
    area: MemoryArea,
    counted: bool,
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        let _ = CONTEXT.try_with(|ctx| {
            let mut ctx = ctx.borrow_mut();
            if let Some(pos) = ctx.frames.iter().rposition(|area| *area == self.area) {
                ctx.frames.remove(pos);
            }
        });
        debug!("leaving {}", self.area);
        if self.counted {
            self.area.release();
        }
    }
}

/// Replaces the frames for the duration of `execute_in_area`.
pub(crate) fn borrow_frames(area: &MemoryArea) -> MemoryResult<BorrowGuard> {
    check_heap_access(area)?;
    CONTEXT.with(|ctx| {
        let mut ctx = ctx.borrow_mut();
        let frames = if area.is_scoped() {
            let pos = ctx
                .frames
                .iter()
                .rposition(|frame| frame == area)
                .ok_or(MemoryError::InaccessibleArea(area.id()))?;
            ctx.frames[..=pos].to_vec()
        } else {
            vec![area.clone()]
        };
        let saved = mem::replace(&mut ctx.frames, frames);
        Ok(BorrowGuard { saved })
    })
}

pub(crate) struct BorrowGuard {
    saved: Vec<MemoryArea>,
}

impl Drop for BorrowGuard {
    fn drop(&mut self) {
        let saved = mem::take(&mut self.saved);
        let _ = CONTEXT.try_with(|ctx| ctx.borrow_mut().frames = saved);
    }
}

/// Snapshot of the calling thread's scope stack, outermost first.
#[derive(Clone, PartialEq, Eq)]
pub struct ScopeStack {
    frames: Vec<MemoryArea>,
}

impl ScopeStack {
    pub fn current() -> Self {
        CONTEXT.with(|ctx| Self {
            frames: ctx.borrow().frames.clone(),
        })
    }

    pub fn areas(&self) -> &[MemoryArea] {
        &self.frames
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn current_area(&self) -> Option<&MemoryArea> {
        self.frames.last()
    }

    pub fn contains(&self, area: &MemoryArea) -> bool {
        self.frames.contains(area)
    }

    pub fn innermost_scope(&self) -> Option<&MemoryArea> {
        self.outer_scope(0)
    }

    /// The `n`th scoped area counting outwards from the innermost one.
    pub fn outer_scope(&self, n: usize) -> Option<&MemoryArea> {
        self.frames.iter().rev().filter(|area| area.is_scoped()).nth(n)
    }
}

impl fmt::Debug for ScopeStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.frames.iter().map(|area| area.id()))
            .finish()
    }
}

/// Scope stack handed from a creating thread to a new schedulable.
///
/// Scoped frames are retained from capture until the schedulable's context
/// is torn down, so they stay alive even if the creator leaves them first.
pub struct InheritedStack {
    frames: Vec<MemoryArea>,
    initial: MemoryArea,
    enter_initial: bool,
    heap_allowed: bool,
    retained: Vec<MemoryArea>,
}

impl InheritedStack {
    /// Captures the calling thread's stack for a schedulable whose initial
    /// allocation context is `initial`.
    ///
    /// - heap or immortal `initial`: the stack is just that area;
    /// - scoped `initial` on the caller's stack: the caller's stack up to and
    ///   including it;
    /// - any other scoped `initial`: the caller's whole stack, and the
    ///   schedulable enters `initial` itself when it starts.
    ///
    /// Without heap access heap frames are dropped and immortal becomes the
    /// base of the stack.
    pub fn capture(initial: &MemoryArea, heap_allowed: bool) -> MemoryResult<Self> {
        if initial.is_heap() && !heap_allowed {
            return Err(MemoryError::HeapAccess);
        }

        let creator = ScopeStack::current().frames;
        let (mut frames, enter_initial) = if !initial.is_scoped() {
            (vec![initial.clone()], false)
        } else if let Some(pos) = creator.iter().rposition(|area| area == initial) {
            (creator[..=pos].to_vec(), false)
        } else {
            (creator, true)
        };

        if !heap_allowed {
            frames.retain(|area| !area.is_heap());
        }
        if frames.first().map_or(true, MemoryArea::is_scoped) {
            let base = if heap_allowed {
                MemoryArea::heap()
            } else {
                MemoryArea::immortal()
            };
            frames.insert(0, base);
        }

        let retained: Vec<MemoryArea> = frames
            .iter()
            .filter(|area| area.is_scoped())
            .cloned()
            .collect();
        for area in &retained {
            area.retain();
        }

        Ok(Self {
            frames,
            initial: initial.clone(),
            enter_initial,
            heap_allowed,
            retained,
        })
    }

    pub fn initial_area(&self) -> &MemoryArea {
        &self.initial
    }

    /// Whether the schedulable has to enter its initial area on start.
    pub fn enters_initial(&self) -> bool {
        self.enter_initial
    }

    pub fn frames(&self) -> &[MemoryArea] {
        &self.frames
    }

    pub fn heap_allowed(&self) -> bool {
        self.heap_allowed
    }

    /// Makes this stack the calling thread's execution context until the
    /// returned guard is dropped.
    pub fn install(mut self, memory: Option<MemoryParameters>) -> ContextGuard {
        let context = ExecutionContext {
            frames: self.frames.clone(),
            heap_allowed: self.heap_allowed,
            budget: memory.map(|params| Budget::new(params, self.initial.clone())),
        };
        let previous = CONTEXT.with(|ctx| mem::replace(&mut *ctx.borrow_mut(), context));
        ContextGuard {
            previous: Some(previous),
            retained: mem::take(&mut self.retained),
        }
    }
}

impl Drop for InheritedStack {
    fn drop(&mut self) {
        for area in self.retained.drain(..).rev() {
            area.release();
        }
    }
}

impl fmt::Debug for InheritedStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InheritedStack")
            .field("frames", &self.frames.iter().map(MemoryArea::id).collect::<Vec<_>>())
            .field("initial", &self.initial.id())
            .field("enter_initial", &self.enter_initial)
            .field("heap_allowed", &self.heap_allowed)
            .finish()
    }
}

/// Restores the previous execution context on drop.
pub struct ContextGuard {
    previous: Option<ExecutionContext>,
    retained: Vec<MemoryArea>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            let _ = CONTEXT.try_with(|ctx| *ctx.borrow_mut() = previous);
        }
        for area in self.retained.drain(..).rev() {
            area.release();
        }
    }
}
