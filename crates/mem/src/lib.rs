//! # rts-mem
//!
//! Region-based memory for real-time schedulables. Objects are allocated in
//! a [`MemoryArea`] and live as long as that area: forever for the immortal
//! area, until unreferenced for the heap, and until the reference count
//! drops to zero for a [`ScopedMemory`].
//!
//! ## Module Overview
//! - [`area`]      – Memory areas, allocation and capacity accounting.
//! - [`scoped`]    – Scoped regions: reference counting, the single-parent
//!   rule, `join`, `join_and_enter` and the portal.
//! - [`stack`]     – The per-thread scope stack and inherited stacks for new
//!   schedulables.
//! - [`reference`] – Handles to area-allocated objects and owner-checked
//!   reference slots.
//! - [`estimator`] – Size estimation for region construction.
//! - [`params`]    – Memory budgets bound to schedulables.
//!
//! The crate has no knowledge of scheduling. `rts-sched` installs a scope
//! stack for every schedulable it starts.

pub mod area;
pub mod error;
pub mod estimator;
pub mod params;
pub mod reference;
pub mod scoped;
pub mod stack;

pub use area::{Allocatable, AreaId, AreaKind, AreaLogic, AreaSize, AreaStats, MemoryArea};
pub use error::{MemoryError, MemoryResult};
pub use estimator::SizeEstimator;
pub use params::{MemoryLimits, MemoryParameters};
pub use reference::{AreaRef, RefSlot};
pub use scoped::{ScopeParent, ScopedMemory, ScopedMemoryBuilder};
pub use stack::{ContextGuard, InheritedStack, ScopeStack};

/// Allocates `value` in the current allocation context.
pub fn allocate<T: Send + Sync + 'static>(value: T) -> MemoryResult<AreaRef<T>> {
    MemoryArea::current().allocate(value)
}

#[cfg(test)]
mod tests;
