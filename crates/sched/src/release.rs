//! Release parameters.
//!
//! A [`ReleaseParameters`] object describes when a schedulable is released
//! and what it may consume per release. One object can be shared by many
//! schedulables: clones are handles to the same values, a setter is seen by
//! every holder at once, and each bound schedulable is told about the change
//! so its scheduler can reevaluate it.
//!
//! Getters return copies. Changing a time value obtained from a getter does
//! not touch the parameters.
//!
//! Defaults:
//!
//! | kind      | cost      | deadline          |
//! |-----------|-----------|-------------------|
//! | periodic  | zero      | the period        |
//! | aperiodic | zero      | largest interval  |
//! | sporadic  | zero      | largest interval  |
//!
//! A zero cost means the budget is not enforced.

use core::fmt;
use std::sync::{Arc, Weak};

use log::debug;
use parking_lot::Mutex;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use rts_time::{ClockHandle, HighResolutionTime};

use crate::error::{ScheduleError, ScheduleResult};
use crate::handler::AsyncEventHandler;
use crate::queue::QueueOverflowPolicy;

/// Kind of release a parameter object describes.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReleaseKind {
    /// Released by the clock every period.
    Periodic,
    /// Released by explicit calls, at any rate.
    Aperiodic,
    /// Released by explicit calls no closer together than the minimum
    /// interarrival time.
    Sporadic,
}

/// What to do with a sporadic release that arrives too early.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MitViolationPolicy {
    /// Refuse it with an error to the releasing caller.
    Except,
    /// Drop it silently.
    Ignore,
    /// Let it overwrite the last queued release.
    Replace,
    /// Keep it, deferred until the interarrival time has elapsed.
    #[default]
    Save,
}

/// Told when a parameter object it is bound to changes.
pub trait ParameterObserver: Send + Sync {
    fn parameters_changed(&self, params: &ReleaseParameters);
}

#[derive(Clone)]
struct ReleaseValues {
    kind: ReleaseKind,
    clock: ClockHandle,
    start: Option<HighResolutionTime>,
    period: Option<HighResolutionTime>,
    minimum_interarrival: Option<HighResolutionTime>,
    mit_policy: MitViolationPolicy,
    cost: HighResolutionTime,
    deadline: HighResolutionTime,
    overrun_handler: Option<AsyncEventHandler>,
    miss_handler: Option<AsyncEventHandler>,
    rousable: bool,
    initial_queue_length: usize,
    overflow_policy: QueueOverflowPolicy,
}

struct ParamsInner {
    values: Mutex<ReleaseValues>,
    observers: Mutex<Vec<Weak<dyn ParameterObserver>>>,
}

/// Shared release descriptor.
#[derive(Clone)]
pub struct ReleaseParameters {
    inner: Arc<ParamsInner>,
}

impl ReleaseParameters {
    /// Periodic release every `period`, starting when the schedulable starts.
    pub fn periodic(period: HighResolutionTime) -> ReleaseBuilder {
        let clock = period.clock().clone();
        ReleaseBuilder::new(ReleaseKind::Periodic, clock).with_period(period)
    }

    /// Aperiodic release on the process real-time clock.
    pub fn aperiodic() -> ReleaseBuilder {
        ReleaseBuilder::new(ReleaseKind::Aperiodic, ClockHandle::realtime())
    }

    /// Sporadic release with the given minimum interarrival time.
    pub fn sporadic(minimum_interarrival: HighResolutionTime) -> ReleaseBuilder {
        let clock = minimum_interarrival.clock().clone();
        ReleaseBuilder::new(ReleaseKind::Sporadic, clock).with_mit(minimum_interarrival)
    }

    pub fn kind(&self) -> ReleaseKind {
        self.inner.values.lock().kind
    }

    pub fn is_periodic(&self) -> bool {
        self.kind() == ReleaseKind::Periodic
    }

    /// Clock the default values were created on.
    pub fn clock(&self) -> ClockHandle {
        self.inner.values.lock().clock.clone()
    }

    pub fn cost(&self) -> HighResolutionTime {
        self.inner.values.lock().cost.clone()
    }

    pub fn deadline(&self) -> HighResolutionTime {
        self.inner.values.lock().deadline.clone()
    }

    pub fn start(&self) -> Option<HighResolutionTime> {
        self.inner.values.lock().start.clone()
    }

    pub fn period(&self) -> Option<HighResolutionTime> {
        self.inner.values.lock().period.clone()
    }

    pub fn minimum_interarrival(&self) -> Option<HighResolutionTime> {
        self.inner.values.lock().minimum_interarrival.clone()
    }

    pub fn mit_violation_policy(&self) -> MitViolationPolicy {
        self.inner.values.lock().mit_policy
    }

    pub fn cost_overrun_handler(&self) -> Option<AsyncEventHandler> {
        self.inner.values.lock().overrun_handler.clone()
    }

    pub fn deadline_miss_handler(&self) -> Option<AsyncEventHandler> {
        self.inner.values.lock().miss_handler.clone()
    }

    pub fn rousable(&self) -> bool {
        self.inner.values.lock().rousable
    }

    pub fn initial_queue_length(&self) -> usize {
        self.inner.values.lock().initial_queue_length
    }

    pub fn queue_overflow_policy(&self) -> QueueOverflowPolicy {
        self.inner.values.lock().overflow_policy
    }

    pub fn set_cost(&self, cost: HighResolutionTime) -> ScheduleResult<()> {
        validate_cost(&cost)?;
        self.update(|values| values.cost = cost)
    }

    pub fn set_deadline(&self, deadline: HighResolutionTime) -> ScheduleResult<()> {
        validate_interval("deadline", &deadline)?;
        self.update(|values| values.deadline = deadline)
    }

    pub fn set_cost_overrun_handler(
        &self,
        handler: Option<AsyncEventHandler>,
    ) -> ScheduleResult<()> {
        self.update(|values| values.overrun_handler = handler)
    }

    pub fn set_deadline_miss_handler(
        &self,
        handler: Option<AsyncEventHandler>,
    ) -> ScheduleResult<()> {
        self.update(|values| values.miss_handler = handler)
    }

    pub fn set_rousable(&self, rousable: bool) -> ScheduleResult<()> {
        self.update(|values| values.rousable = rousable)
    }

    pub fn set_initial_queue_length(&self, length: usize) -> ScheduleResult<()> {
        self.update(|values| values.initial_queue_length = length)
    }

    pub fn set_queue_overflow_policy(&self, policy: QueueOverflowPolicy) -> ScheduleResult<()> {
        self.update(|values| values.overflow_policy = policy)
    }

    pub fn set_period(&self, period: HighResolutionTime) -> ScheduleResult<()> {
        self.require(ReleaseKind::Periodic, "period")?;
        validate_interval("period", &period)?;
        self.update(|values| values.period = Some(period))
    }

    /// Sets the first release time of a periodic schedulable. Absolute values
    /// name the instant, relative values are measured from `start()`.
    pub fn set_start(&self, start: HighResolutionTime) -> ScheduleResult<()> {
        self.require(ReleaseKind::Periodic, "start")?;
        validate_start(&start)?;
        self.update(|values| values.start = Some(start))
    }

    pub fn set_minimum_interarrival(&self, mit: HighResolutionTime) -> ScheduleResult<()> {
        self.require(ReleaseKind::Sporadic, "minimum interarrival")?;
        validate_interval("minimum interarrival", &mit)?;
        self.update(|values| values.minimum_interarrival = Some(mit))
    }

    pub fn set_mit_violation_policy(&self, policy: MitViolationPolicy) -> ScheduleResult<()> {
        self.require(ReleaseKind::Sporadic, "mit violation policy")?;
        self.update(|values| values.mit_policy = policy)
    }

    /// Whether both handles share the same values.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of live schedulables bound to these parameters.
    pub fn bound_count(&self) -> usize {
        let mut observers = self.inner.observers.lock();
        observers.retain(|observer| observer.strong_count() > 0);
        observers.len()
    }

    pub(crate) fn bind(&self, observer: Weak<dyn ParameterObserver>) {
        let mut observers = self.inner.observers.lock();
        observers.retain(|existing| existing.strong_count() > 0);
        observers.push(observer);
    }

    pub(crate) fn unbind(&self, observer: &Weak<dyn ParameterObserver>) {
        self.inner
            .observers
            .lock()
            .retain(|existing| existing.strong_count() > 0 && !Weak::ptr_eq(existing, observer));
    }

    fn require(&self, kind: ReleaseKind, name: &'static str) -> ScheduleResult<()> {
        if self.kind() == kind {
            Ok(())
        } else {
            Err(ScheduleError::InvalidParameter {
                name,
                reason: "not defined for this release kind",
            })
        }
    }

    fn update(&self, apply: impl FnOnce(&mut ReleaseValues)) -> ScheduleResult<()> {
        apply(&mut self.inner.values.lock());
        self.notify();
        Ok(())
    }

    fn notify(&self) {
        let observers: Vec<Arc<dyn ParameterObserver>> = {
            let mut observers = self.inner.observers.lock();
            observers.retain(|observer| observer.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        debug!("release parameters changed, {} bound", observers.len());
        for observer in observers {
            observer.parameters_changed(self);
        }
    }
}

impl fmt::Debug for ReleaseParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = self.inner.values.lock();
        f.debug_struct("ReleaseParameters")
            .field("kind", &values.kind)
            .field("cost", &values.cost)
            .field("deadline", &values.deadline)
            .field("period", &values.period)
            .field("minimum_interarrival", &values.minimum_interarrival)
            .field("rousable", &values.rousable)
            .field("initial_queue_length", &values.initial_queue_length)
            .field("overflow_policy", &values.overflow_policy)
            .finish()
    }
}

/// Builder for [`ReleaseParameters`]. Every value is validated by `build`.
pub struct ReleaseBuilder {
    values: ReleaseValues,
    deadline: Option<HighResolutionTime>,
}

impl ReleaseBuilder {
    fn new(kind: ReleaseKind, clock: ClockHandle) -> Self {
        Self {
            values: ReleaseValues {
                kind,
                cost: clock.millis(0),
                deadline: HighResolutionTime::max_relative(&clock),
                clock,
                start: None,
                period: None,
                minimum_interarrival: None,
                mit_policy: MitViolationPolicy::default(),
                overrun_handler: None,
                miss_handler: None,
                rousable: false,
                initial_queue_length: 0,
                overflow_policy: QueueOverflowPolicy::default(),
            },
            deadline: None,
        }
    }

    fn with_period(mut self, period: HighResolutionTime) -> Self {
        self.values.period = Some(period);
        self
    }

    fn with_mit(mut self, mit: HighResolutionTime) -> Self {
        self.values.minimum_interarrival = Some(mit);
        self
    }

    /// Rebinds the default cost and deadline to `clock`.
    pub fn clock(mut self, clock: &ClockHandle) -> Self {
        self.values.cost = self.values.cost.on_clock(clock);
        self.values.deadline = HighResolutionTime::max_relative(clock);
        self.values.clock = clock.clone();
        self
    }

    pub fn start(mut self, start: HighResolutionTime) -> Self {
        self.values.start = Some(start);
        self
    }

    pub fn cost(mut self, cost: HighResolutionTime) -> Self {
        self.values.cost = cost;
        self
    }

    pub fn deadline(mut self, deadline: HighResolutionTime) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn overrun_handler(mut self, handler: AsyncEventHandler) -> Self {
        self.values.overrun_handler = Some(handler);
        self
    }

    pub fn miss_handler(mut self, handler: AsyncEventHandler) -> Self {
        self.values.miss_handler = Some(handler);
        self
    }

    pub fn rousable(mut self, rousable: bool) -> Self {
        self.values.rousable = rousable;
        self
    }

    pub fn initial_queue_length(mut self, length: usize) -> Self {
        self.values.initial_queue_length = length;
        self
    }

    pub fn overflow_policy(mut self, policy: QueueOverflowPolicy) -> Self {
        self.values.overflow_policy = policy;
        self
    }

    pub fn mit_violation_policy(mut self, policy: MitViolationPolicy) -> Self {
        self.values.mit_policy = policy;
        self
    }

    pub fn build(self) -> ScheduleResult<ReleaseParameters> {
        let mut values = self.values;
        validate_cost(&values.cost)?;
        if let Some(period) = &values.period {
            validate_interval("period", period)?;
        }
        if let Some(mit) = &values.minimum_interarrival {
            validate_interval("minimum interarrival", mit)?;
        }
        if let Some(start) = &values.start {
            if values.kind != ReleaseKind::Periodic {
                return Err(ScheduleError::InvalidParameter {
                    name: "start",
                    reason: "not defined for this release kind",
                });
            }
            validate_start(start)?;
        }
        match self.deadline {
            Some(deadline) => {
                validate_interval("deadline", &deadline)?;
                values.deadline = deadline;
            }
            None => {
                if let Some(period) = &values.period {
                    values.deadline = period.clone();
                }
            }
        }

        Ok(ReleaseParameters {
            inner: Arc::new(ParamsInner {
                values: Mutex::new(values),
                observers: Mutex::new(Vec::new()),
            }),
        })
    }
}

fn validate_cost(cost: &HighResolutionTime) -> ScheduleResult<()> {
    if !cost.is_relative() {
        return Err(ScheduleError::InvalidParameter {
            name: "cost",
            reason: "must be a relative time",
        });
    }
    if cost.is_negative() {
        return Err(ScheduleError::InvalidParameter {
            name: "cost",
            reason: "must not be negative",
        });
    }
    Ok(())
}

fn validate_interval(name: &'static str, value: &HighResolutionTime) -> ScheduleResult<()> {
    if !value.is_relative() {
        return Err(ScheduleError::InvalidParameter {
            name,
            reason: "must be a relative time",
        });
    }
    if !value.is_positive() {
        return Err(ScheduleError::InvalidParameter {
            name,
            reason: "must be greater than zero",
        });
    }
    Ok(())
}

fn validate_start(start: &HighResolutionTime) -> ScheduleResult<()> {
    if start.is_relative() && start.is_negative() {
        return Err(ScheduleError::InvalidParameter {
            name: "start",
            reason: "relative start must not be negative",
        });
    }
    Ok(())
}
