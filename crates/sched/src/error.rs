use std::io;

use thiserror::Error;

use rts_mem::MemoryError;
use rts_time::TimeError;

use crate::control::{ReleaseState, SchedulableId};

/// Errors raised by release parameters, schedulables and the scheduler.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid {name}: {reason}")]
    InvalidParameter {
        name: &'static str,
        reason: &'static str,
    },
    #[error("priority {priority} outside {min}..={max}")]
    InvalidPriority { priority: u8, min: u8, max: u8 },
    #[error("arrival queue of {id} is full ({capacity} entries)")]
    QueueOverflow { id: SchedulableId, capacity: usize },
    #[error("release of {id} violates its minimum interarrival time")]
    MitViolation { id: SchedulableId },
    #[error("cannot {op} {id} while {state:?}")]
    InvalidState {
        id: SchedulableId,
        op: &'static str,
        state: ReleaseState,
    },
    #[error("{0} has already been started")]
    AlreadyStarted(SchedulableId),
    #[error("{0} has terminated")]
    Terminated(SchedulableId),
    #[error("timer has already been started")]
    TimerStarted,
    #[error("scheduler has been shut down")]
    ShutDown,
    #[error("logic of {0} panicked")]
    LogicPanicked(SchedulableId),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Time(#[from] TimeError),
    #[error("failed to spawn schedulable thread: {0}")]
    Spawn(#[from] io::Error),
}

pub type ScheduleResult<T> = Result<T, ScheduleError>;
