use thiserror::Error;

use rts_time::TimeError;

use crate::area::AreaId;
use crate::scoped::ScopeParent;

/// Errors raised by memory areas and the scope stack.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("invalid region size: initial {initial} bytes, maximum {maximum} bytes")]
    InvalidSize { initial: usize, maximum: usize },
    #[error("size estimate is not representable")]
    EstimateOverflow,
    #[error("{area} exhausted: requested {requested} bytes, {remaining} remaining")]
    OutOfMemory {
        area: AreaId,
        requested: usize,
        remaining: usize,
    },
    #[error("memory budget for {area} exceeded: {used} used + {requested} requested > {limit}")]
    BudgetExceeded {
        area: AreaId,
        requested: usize,
        used: usize,
        limit: usize,
    },
    #[error("object in {target} cannot be referenced from {holder}")]
    IllegalAssignment { holder: AreaId, target: AreaId },
    #[error("{area} is parented by {parent}, cannot enter it from {current}")]
    ScopedCycle {
        area: AreaId,
        parent: ScopeParent,
        current: ScopeParent,
    },
    #[error("{0} is not on the current scope stack")]
    InaccessibleArea(AreaId),
    #[error("{0} has no entry logic")]
    NoLogic(AreaId),
    #[error("reference into {area} is stale")]
    StaleReference { area: AreaId },
    #[error("heap access from a no-heap context")]
    HeapAccess,
    #[error("portal object has a different type")]
    PortalType,
    #[error(transparent)]
    Time(#[from] TimeError),
}

pub type MemoryResult<T> = Result<T, MemoryError>;
