//! Trace records emitted by the scheduler and the release engine.
//!
//! Records are delivered synchronously to an optional [`TraceHook`] on the
//! thread that produced them. Every record carries a stable numeric type so
//! that host tools can decode a captured stream without the Rust types.

use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::control::SchedulableId;
use crate::queue::QueueOverflowPolicy;

/// Record type identifiers.
pub mod records {
    /// A release began (`RTS_RELEASE`).
    pub const RELEASE: u8 = 60;
    /// A release completed (`RTS_COMPLETE`).
    pub const COMPLETE: u8 = 61;
    /// Cost budget exhausted (`RTS_OVERRUN`).
    pub const OVERRUN: u8 = 62;
    /// Deadline reached while executing (`RTS_MISS`).
    pub const MISS: u8 = 63;
    /// Arrival rejected or dropped by the queue policy (`RTS_QUEUE_OVERFLOW`).
    pub const QUEUE_OVERFLOW: u8 = 64;
    /// Release masked while descheduled (`RTS_MASKED`).
    pub const MASKED: u8 = 65;
    /// Schedulable interrupted (`RTS_INTERRUPT`).
    pub const INTERRUPT: u8 = 66;
    /// Scheduler notified of a parameter change (`RTS_REEVALUATE`).
    pub const REEVALUATE: u8 = 70;
    /// Scheduler tick (`RTS_TICK`).
    pub const TICK: u8 = 71;
    /// Timer fired (`RTS_TIMER_FIRE`).
    pub const TIMER_FIRE: u8 = 72;
    /// Handler logic panicked (`RTS_HANDLER_PANIC`).
    pub const HANDLER_PANIC: u8 = 73;
    /// Handler release dropped, initial area not enterable (`RTS_HANDLER_SKIP`).
    pub const HANDLER_SKIP: u8 = 74;
}

/// A single trace record. Times are nanoseconds on the scheduler's clock.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceRecord {
    Release {
        id: SchedulableId,
        at_ns: i128,
        interrupted: bool,
    },
    Complete {
        id: SchedulableId,
        at_ns: i128,
        missed: bool,
    },
    Overrun {
        id: SchedulableId,
        consumed_ns: i128,
        budget_ns: i128,
    },
    DeadlineMiss {
        id: SchedulableId,
        deadline_ns: i128,
    },
    QueueOverflow {
        id: SchedulableId,
        policy: QueueOverflowPolicy,
    },
    Masked {
        id: SchedulableId,
    },
    Interrupt {
        id: SchedulableId,
    },
    Reevaluate {
        id: SchedulableId,
    },
    Tick {
        tick: u64,
        at_ns: i128,
    },
    TimerFire {
        timer: u64,
        at_ns: i128,
    },
    HandlerPanic {
        id: SchedulableId,
    },
    HandlerSkipped {
        id: SchedulableId,
    },
}

impl TraceRecord {
    pub fn record_type(&self) -> u8 {
        match self {
            Self::Release { .. } => records::RELEASE,
            Self::Complete { .. } => records::COMPLETE,
            Self::Overrun { .. } => records::OVERRUN,
            Self::DeadlineMiss { .. } => records::MISS,
            Self::QueueOverflow { .. } => records::QUEUE_OVERFLOW,
            Self::Masked { .. } => records::MASKED,
            Self::Interrupt { .. } => records::INTERRUPT,
            Self::Reevaluate { .. } => records::REEVALUATE,
            Self::Tick { .. } => records::TICK,
            Self::TimerFire { .. } => records::TIMER_FIRE,
            Self::HandlerPanic { .. } => records::HANDLER_PANIC,
            Self::HandlerSkipped { .. } => records::HANDLER_SKIP,
        }
    }
}

pub type TraceHook = Arc<dyn Fn(&TraceRecord) + Send + Sync>;

pub(crate) fn emit(hook: &Option<TraceHook>, record: TraceRecord) {
    if let Some(hook) = hook {
        hook(&record);
    }
}
