//! # rts-sched
//!
//! Release parameters and the release engine for real-time schedulables.
//!
//! ## Module Overview
//! - [`release`]   – Periodic, aperiodic and sporadic release parameters,
//!   shared one-to-many with change notification.
//! - [`queue`]     – Arrival queues and their overflow policies.
//! - [`control`]   – The per-schedulable release state machine: releases,
//!   cost accounting, deadline detection, interrupts and descheduling.
//! - [`handler`]   – Asynchronous event handlers with serialized releases.
//! - [`event`]     – Asynchronous events fanning out to handlers.
//! - [`timer`]     – One-shot and periodic timers.
//! - [`thread`]    – Real-time threads running in an inherited scope stack.
//! - [`scheduler`] – Registry, priority validation, the tick and the
//!   background ticker.
//! - [`config`]    – Scheduler configuration.
//! - [`trace`]     – Typed trace records and hooks.
//!
//! Time values come from `rts-time`; memory areas and scope stacks from
//! `rts-mem`.

pub mod config;
pub mod control;
pub mod error;
pub mod event;
pub mod handler;
pub mod params;
pub mod queue;
pub mod release;
pub mod scheduler;
pub mod thread;
pub mod timer;
pub mod trace;

pub use config::{SchedulerConfig, SchedulerConfigBuilder};
pub use control::{
    NextRelease, ReleaseControl, ReleaseCounters, ReleaseState, SchedulableId, WakeReason,
};
pub use error::{ScheduleError, ScheduleResult};
pub use event::AsyncEvent;
pub use handler::{AsyncEventHandler, HandlerBuilder, HandlerContext};
pub use params::{Affinity, PriorityParameters};
pub use queue::{ArrivalOutcome, ArrivalQueue, QueueOverflowPolicy};
pub use release::{
    MitViolationPolicy, ParameterObserver, ReleaseBuilder, ReleaseKind, ReleaseParameters,
};
pub use scheduler::{Schedulable, SchedulableInfo, Scheduler, TickReport};
pub use thread::{RealtimeThread, ReleaseContext, ThreadBuilder};
pub use timer::Timer;
pub use trace::{TraceHook, TraceRecord};

#[cfg(test)]
mod tests;
