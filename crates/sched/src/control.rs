//! The release engine of a single schedulable.
//!
//! A [`ReleaseControl`] owns the release state machine:
//!
//! ```text
//! NotStarted -> WaitingForRelease -> Executing -> WaitingForRelease ...
//!                                        |
//!                                        +-> DeadlineMiss -> WaitingForRelease ...
//! any state -> Terminated
//! ```
//!
//! Releases are deposited as arrival times: by `release()` for aperiodic and
//! sporadic schedulables, by the clock for periodic ones. The schedulable's
//! own thread consumes them in `wait_for_next_release()`. Cost is charged by
//! the scheduler tick for the time a release spends executing, and
//! explicitly through `charge()`. Overrun and miss handlers are released at
//! most once per release.
//!
//! While descheduled, new releases are masked and cost and deadline are not
//! enforced; accumulated consumption and the periodic timeline are kept.
//!
//! All times are nanoseconds on the control's clock.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use log::{debug, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use rts_time::{ClockHandle, HighResolutionTime, TimeKind};

use crate::error::{ScheduleError, ScheduleResult};
use crate::handler::AsyncEventHandler;
use crate::queue::{ArrivalOutcome, ArrivalQueue, QueueOverflowPolicy};
use crate::release::{MitViolationPolicy, ParameterObserver, ReleaseKind, ReleaseParameters};
use crate::scheduler::SchedulerInner;
use crate::trace::{self, TraceHook, TraceRecord};

static NEXT_SCHEDULABLE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a schedulable.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchedulableId(pub u64);

impl SchedulableId {
    pub(crate) fn next() -> Self {
        Self(NEXT_SCHEDULABLE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SchedulableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "schedulable#{}", self.0)
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReleaseState {
    NotStarted,
    WaitingForRelease,
    Executing,
    /// Executing past the deadline of the current release.
    DeadlineMiss,
    Terminated,
}

/// Why `wait_for_next_release` returned.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WakeReason {
    Released,
    /// Woken by an interrupt; counts as a release.
    Interrupted,
}

/// Outcome of `wait_for_next_release`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextRelease {
    /// Whether the release that just completed missed its deadline.
    pub deadline_missed: bool,
    pub wake: WakeReason,
    /// Nominal time of the new release.
    pub release_time: HighResolutionTime,
}

/// Running totals of a schedulable's releases.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseCounters {
    pub released: u64,
    pub completed: u64,
    pub overruns: u64,
    pub misses: u64,
    /// Releases dropped while descheduled.
    pub masked: u64,
    /// Arrivals dropped by the queue or interarrival policy.
    pub dropped: u64,
    pub interrupts: u64,
}

/// Result of a scheduler tick for one schedulable.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TickOutcome {
    pub(crate) released: usize,
    pub(crate) executing: bool,
    pub(crate) overrun: bool,
    pub(crate) missed: bool,
}

struct CurrentRelease {
    released_at: i128,
    deadline_at: i128,
    charged_until: i128,
    consumed: i128,
    overrun_fired: bool,
    miss_fired: bool,
}

struct ControlState {
    state: ReleaseState,
    descheduled: bool,
    /// Inside `wait_for_next_release`.
    blocked: bool,
    queue: ArrivalQueue,
    current: Option<CurrentRelease>,
    next_periodic: Option<i128>,
    last_arrival: Option<i128>,
    interrupt_pending: bool,
    wake_interrupt: bool,
    counters: ReleaseCounters,
}

/// Snapshot of the release parameters in nanoseconds.
struct Timing {
    kind: ReleaseKind,
    cost_ns: i128,
    deadline_ns: i128,
    period_ns: Option<i128>,
    mit_ns: Option<i128>,
    mit_policy: MitViolationPolicy,
    start: Option<HighResolutionTime>,
    rousable: bool,
    queue_length: usize,
    policy: QueueOverflowPolicy,
}

impl Timing {
    fn of(params: &ReleaseParameters) -> Self {
        Self {
            kind: params.kind(),
            cost_ns: params.cost().as_nanos(),
            deadline_ns: params.deadline().as_nanos(),
            period_ns: params.period().map(|period| period.as_nanos()),
            mit_ns: params.minimum_interarrival().map(|mit| mit.as_nanos()),
            mit_policy: params.mit_violation_policy(),
            start: params.start(),
            rousable: params.rousable(),
            queue_length: params.initial_queue_length(),
            policy: params.queue_overflow_policy(),
        }
    }

    fn first_release(&self, now: i128) -> i128 {
        match &self.start {
            None => now,
            Some(start) if start.is_absolute() => start.as_nanos(),
            Some(start) => now + start.as_nanos(),
        }
    }
}

/// Work collected under the state lock and carried out after releasing it.
#[derive(Default)]
struct Effects {
    records: Vec<TraceRecord>,
    overrun: Option<AsyncEventHandler>,
    miss: Option<AsyncEventHandler>,
}

#[derive(Default)]
struct Hooks {
    scheduler: Option<Weak<SchedulerInner>>,
    trace: Option<TraceHook>,
}

/// Release state machine shared by a schedulable and its scheduler.
pub struct ReleaseControl {
    id: SchedulableId,
    name: String,
    clock: ClockHandle,
    params: Mutex<ReleaseParameters>,
    state: Mutex<ControlState>,
    /// Wakes the schedulable's own thread.
    wake: Condvar,
    /// Wakes observers of state transitions.
    changed: Condvar,
    hooks: Mutex<Hooks>,
    observer: Weak<dyn ParameterObserver>,
}

impl ReleaseControl {
    pub(crate) fn new(name: String, params: ReleaseParameters, clock: ClockHandle) -> Arc<Self> {
        let capacity = params.initial_queue_length();
        let control = Arc::new_cyclic(|weak: &Weak<ReleaseControl>| {
            let observer: Weak<dyn ParameterObserver> = weak.clone();
            Self {
                id: SchedulableId::next(),
                name,
                clock,
                params: Mutex::new(params.clone()),
                state: Mutex::new(ControlState {
                    state: ReleaseState::NotStarted,
                    descheduled: false,
                    blocked: false,
                    queue: ArrivalQueue::new(capacity),
                    current: None,
                    next_periodic: None,
                    last_arrival: None,
                    interrupt_pending: false,
                    wake_interrupt: false,
                    counters: ReleaseCounters::default(),
                }),
                wake: Condvar::new(),
                changed: Condvar::new(),
                hooks: Mutex::new(Hooks::default()),
                observer,
            }
        });
        params.bind(control.observer.clone());
        control
    }

    pub fn id(&self) -> SchedulableId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Clock releases and deadlines are measured on.
    pub fn clock(&self) -> &ClockHandle {
        &self.clock
    }

    pub fn release_parameters(&self) -> ReleaseParameters {
        self.params.lock().clone()
    }

    /// Binds the schedulable to a different parameter object.
    pub fn set_release_parameters(&self, params: ReleaseParameters) {
        let previous = std::mem::replace(&mut *self.params.lock(), params.clone());
        previous.unbind(&self.observer);
        params.bind(self.observer.clone());

        let timing = Timing::of(&params);
        let now = self.now();
        {
            let mut st = self.state.lock();
            st.queue.set_capacity(timing.queue_length);
            let started = !matches!(
                st.state,
                ReleaseState::NotStarted | ReleaseState::Terminated
            );
            if timing.kind != ReleaseKind::Periodic {
                st.next_periodic = None;
            } else if started && st.next_periodic.is_none() {
                st.next_periodic = Some(timing.first_release(now));
            }
        }
        self.wake.notify_all();
        self.notify_scheduler();
    }

    pub fn state(&self) -> ReleaseState {
        self.state.lock().state
    }

    pub fn is_descheduled(&self) -> bool {
        self.state.lock().descheduled
    }

    /// Whether the schedulable is parked in `wait_for_next_release`.
    pub fn is_blocked(&self) -> bool {
        self.state.lock().blocked
    }

    pub fn counters(&self) -> ReleaseCounters {
        self.state.lock().counters
    }

    /// Releases queued but not yet consumed.
    pub fn pending_releases(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Removes every pending release, returning how many there were.
    pub fn take_pending_releases(&self) -> usize {
        let taken = self.state.lock().queue.drain();
        if taken > 0 {
            self.changed.notify_all();
        }
        taken
    }

    /// Cost consumed by the current release.
    pub fn consumed(&self) -> Option<HighResolutionTime> {
        let consumed = self.state.lock().current.as_ref()?.consumed;
        HighResolutionTime::from_nanos(TimeKind::Relative, consumed, &self.clock).ok()
    }

    /// Moves from not-started to waiting; periodic schedulables get their
    /// first release time.
    pub(crate) fn start(&self) -> ScheduleResult<()> {
        let timing = self.timing();
        let now = self.now();
        let mut st = self.state.lock();
        match st.state {
            ReleaseState::NotStarted => {}
            ReleaseState::Terminated => return Err(ScheduleError::Terminated(self.id)),
            _ => return Err(ScheduleError::AlreadyStarted(self.id)),
        }
        st.state = ReleaseState::WaitingForRelease;
        if timing.kind == ReleaseKind::Periodic {
            st.next_periodic = Some(timing.first_release(now));
        }
        debug!("{} ({}) started", self.id, self.name);
        drop(st);
        self.changed.notify_all();
        Ok(())
    }

    /// Deposits a release. Never blocks.
    ///
    /// Periodic schedulables are released by their clock and refuse this
    /// call. The outcome tells whether the arrival was queued or dropped;
    /// only the reject policy and the except interarrival policy fail.
    pub fn release(&self) -> ScheduleResult<ArrivalOutcome> {
        let timing = self.timing();
        let now = self.now();
        let mut effects = Effects::default();
        let outcome = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            if timing.kind == ReleaseKind::Periodic || st.state == ReleaseState::NotStarted {
                return Err(ScheduleError::InvalidState {
                    id: self.id,
                    op: "release",
                    state: st.state,
                });
            }
            if st.state == ReleaseState::Terminated {
                return Err(ScheduleError::Terminated(self.id));
            }
            self.arrive(st, &timing, now, &mut effects)
        };
        self.dispatch(effects);
        outcome
    }

    fn arrive(
        &self,
        st: &mut ControlState,
        timing: &Timing,
        now: i128,
        effects: &mut Effects,
    ) -> ScheduleResult<ArrivalOutcome> {
        if st.descheduled {
            st.counters.masked += 1;
            effects.records.push(TraceRecord::Masked { id: self.id });
            return Ok(ArrivalOutcome::Masked);
        }

        let mut at = now;
        if let (ReleaseKind::Sporadic, Some(mit), Some(last)) =
            (timing.kind, timing.mit_ns, st.last_arrival)
        {
            let earliest = last + mit;
            if now < earliest {
                match timing.mit_policy {
                    MitViolationPolicy::Except => {
                        warn!(
                            "{}: release {} ns before its interarrival time",
                            self.id,
                            earliest - now
                        );
                        return Err(ScheduleError::MitViolation { id: self.id });
                    }
                    MitViolationPolicy::Ignore => {
                        st.counters.dropped += 1;
                        return Ok(ArrivalOutcome::Ignored);
                    }
                    MitViolationPolicy::Replace => {
                        if st.queue.replace_newest(now) {
                            st.last_arrival = Some(now);
                            self.wake.notify_all();
                            return Ok(ArrivalOutcome::Replaced);
                        }
                        st.counters.dropped += 1;
                        return Ok(ArrivalOutcome::Ignored);
                    }
                    MitViolationPolicy::Save => at = earliest,
                }
            }
        }

        match st.queue.push(at, timing.policy) {
            Ok(ArrivalOutcome::Discarded) => {
                st.counters.dropped += 1;
                warn!("{}: arrival queue full, release discarded", self.id);
                effects.records.push(TraceRecord::QueueOverflow {
                    id: self.id,
                    policy: timing.policy,
                });
                Ok(ArrivalOutcome::Discarded)
            }
            Ok(outcome) => {
                st.last_arrival = Some(at);
                self.wake.notify_all();
                Ok(outcome)
            }
            Err(full) => {
                warn!("{}: arrival queue full, release rejected", self.id);
                effects.records.push(TraceRecord::QueueOverflow {
                    id: self.id,
                    policy: timing.policy,
                });
                Err(ScheduleError::QueueOverflow {
                    id: self.id,
                    capacity: full.capacity,
                })
            }
        }
    }

    /// Completes the current release, if any, and blocks until the next one.
    ///
    /// Must be called from the schedulable's own thread. Returns
    /// [`ScheduleError::Terminated`] once the schedulable is terminated.
    pub fn wait_for_next_release(&self) -> ScheduleResult<NextRelease> {
        let mut effects = Effects::default();
        let mut guard = self.state.lock();
        let now = self.now();
        let missed = match guard.state {
            ReleaseState::NotStarted => {
                return Err(ScheduleError::InvalidState {
                    id: self.id,
                    op: "wait for release",
                    state: guard.state,
                })
            }
            ReleaseState::Terminated => return Err(ScheduleError::Terminated(self.id)),
            ReleaseState::Executing | ReleaseState::DeadlineMiss => {
                self.complete(&mut guard, now, &mut effects)
            }
            ReleaseState::WaitingForRelease => false,
        };
        guard.state = ReleaseState::WaitingForRelease;
        guard.blocked = true;
        self.changed.notify_all();

        if !effects.is_empty() {
            MutexGuard::unlocked(&mut guard, || self.dispatch(std::mem::take(&mut effects)));
        }

        loop {
            let timing = self.timing();
            let now = self.now();
            let st = &mut *guard;

            if st.state == ReleaseState::Terminated {
                st.blocked = false;
                self.changed.notify_all();
                return Err(ScheduleError::Terminated(self.id));
            }

            if st.wake_interrupt {
                st.wake_interrupt = false;
                let at = self.begin(st, &timing, now, now, true, &mut effects);
                drop(guard);
                self.dispatch(effects);
                return Ok(NextRelease {
                    deadline_missed: missed,
                    wake: WakeReason::Interrupted,
                    release_time: self.instant(at)?,
                });
            }

            self.generate_periodic(st, &timing, now, &mut effects);

            let wait_until = match st.queue.front() {
                Some(_) if st.descheduled => None,
                Some(at) if at <= now => {
                    st.queue.pop();
                    let at = self.begin(st, &timing, at, now, false, &mut effects);
                    drop(guard);
                    self.dispatch(effects);
                    return Ok(NextRelease {
                        deadline_missed: missed,
                        wake: WakeReason::Released,
                        release_time: self.instant(at)?,
                    });
                }
                Some(at) => Some(at),
                None => st.next_periodic,
            };

            if !effects.is_empty() {
                MutexGuard::unlocked(&mut guard, || self.dispatch(std::mem::take(&mut effects)));
                continue;
            }

            match wait_until {
                Some(at) => {
                    let nanos = u64::try_from(at - now).unwrap_or(u64::MAX);
                    self.wake.wait_for(&mut guard, Duration::from_nanos(nanos));
                }
                None => self.wake.wait(&mut guard),
            }
        }
    }

    fn begin(
        &self,
        st: &mut ControlState,
        timing: &Timing,
        at: i128,
        now: i128,
        interrupted: bool,
        effects: &mut Effects,
    ) -> i128 {
        st.current = Some(CurrentRelease {
            released_at: at,
            deadline_at: at.saturating_add(timing.deadline_ns),
            charged_until: now,
            consumed: 0,
            overrun_fired: false,
            miss_fired: false,
        });
        st.state = ReleaseState::Executing;
        st.blocked = false;
        st.interrupt_pending = false;
        st.counters.released += 1;
        debug!("{} released at {at} ns", self.id);
        effects.records.push(TraceRecord::Release {
            id: self.id,
            at_ns: at,
            interrupted,
        });
        self.changed.notify_all();
        at
    }

    fn complete(&self, st: &mut ControlState, now: i128, effects: &mut Effects) -> bool {
        let Some(mut current) = st.current.take() else {
            return false;
        };
        st.counters.completed += 1;
        let late = now > current.deadline_at;
        if late && !current.miss_fired && !st.descheduled {
            self.fire_miss(st, &mut current, effects);
        }
        let missed = current.miss_fired;
        debug!(
            "{} completed release of {} ns{}",
            self.id,
            current.released_at,
            if missed { " late" } else { "" }
        );
        effects.records.push(TraceRecord::Complete {
            id: self.id,
            at_ns: now,
            missed,
        });
        missed
    }

    /// Charges `amount` of execution time to the current release.
    pub fn charge(&self, amount: &HighResolutionTime) -> ScheduleResult<()> {
        if !amount.is_relative() || amount.is_negative() {
            return Err(ScheduleError::InvalidParameter {
                name: "charge",
                reason: "must be a non-negative relative time",
            });
        }
        let timing = self.timing();
        let mut effects = Effects::default();
        {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            if !matches!(
                st.state,
                ReleaseState::Executing | ReleaseState::DeadlineMiss
            ) {
                return Err(ScheduleError::InvalidState {
                    id: self.id,
                    op: "charge",
                    state: st.state,
                });
            }
            self.consume(st, &timing, amount.as_nanos(), &mut effects);
        }
        self.dispatch(effects);
        Ok(())
    }

    fn consume(&self, st: &mut ControlState, timing: &Timing, amount: i128, effects: &mut Effects) {
        let Some(current) = st.current.as_mut() else {
            return;
        };
        current.consumed = current.consumed.saturating_add(amount);
        let over_budget = timing.cost_ns > 0 && current.consumed > timing.cost_ns;
        if over_budget && !current.overrun_fired && !st.descheduled {
            current.overrun_fired = true;
            st.counters.overruns += 1;
            warn!(
                "{}: cost overrun, {} ns consumed of {} ns",
                self.id, current.consumed, timing.cost_ns
            );
            effects.records.push(TraceRecord::Overrun {
                id: self.id,
                consumed_ns: current.consumed,
                budget_ns: timing.cost_ns,
            });
            effects.overrun = self.release_parameters().cost_overrun_handler();
        }
    }

    fn fire_miss(
        &self,
        st: &mut ControlState,
        current: &mut CurrentRelease,
        effects: &mut Effects,
    ) {
        current.miss_fired = true;
        st.counters.misses += 1;
        warn!(
            "{}: deadline of {} ns missed",
            self.id, current.deadline_at
        );
        effects.records.push(TraceRecord::DeadlineMiss {
            id: self.id,
            deadline_ns: current.deadline_at,
        });
        effects.miss = self.release_parameters().deadline_miss_handler();
    }

    fn generate_periodic(
        &self,
        st: &mut ControlState,
        timing: &Timing,
        now: i128,
        effects: &mut Effects,
    ) -> usize {
        let (Some(mut next), Some(period)) = (st.next_periodic, timing.period_ns) else {
            return 0;
        };
        let mut released = 0;
        while next <= now {
            if st.descheduled {
                st.counters.masked += 1;
                effects.records.push(TraceRecord::Masked { id: self.id });
            } else if st.queue.push(next, QueueOverflowPolicy::Grow).is_ok() {
                released += 1;
            }
            next += period;
        }
        st.next_periodic = Some(next);
        released
    }

    /// Advances the engine to `now`: generates due periodic releases, charges
    /// the time spent executing since the last tick and checks the deadline.
    pub(crate) fn on_tick(&self, now: i128) -> TickOutcome {
        let timing = self.timing();
        let mut effects = Effects::default();
        let mut outcome = TickOutcome::default();
        {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            if matches!(
                st.state,
                ReleaseState::NotStarted | ReleaseState::Terminated
            ) {
                return outcome;
            }

            outcome.released = self.generate_periodic(st, &timing, now, &mut effects);
            let before = st.counters;

            if matches!(
                st.state,
                ReleaseState::Executing | ReleaseState::DeadlineMiss
            ) {
                let mut amount = 0;
                if let Some(current) = st.current.as_mut() {
                    amount = (now - current.charged_until).max(0);
                    current.charged_until = current.charged_until.max(now);
                }
                self.consume(st, &timing, amount, &mut effects);
                self.check_deadline(st, now, &mut effects);
            }

            outcome.overrun = st.counters.overruns > before.overruns;
            outcome.missed = st.counters.misses > before.misses;
            outcome.executing = matches!(
                st.state,
                ReleaseState::Executing | ReleaseState::DeadlineMiss
            );
            if !st.queue.is_empty() {
                self.wake.notify_all();
            }
        }
        self.dispatch(effects);
        outcome
    }

    fn check_deadline(&self, st: &mut ControlState, now: i128, effects: &mut Effects) {
        if st.descheduled {
            return;
        }
        let Some(mut current) = st.current.take() else {
            return;
        };
        if !current.miss_fired && now >= current.deadline_at {
            self.fire_miss(st, &mut current, effects);
            st.state = ReleaseState::DeadlineMiss;
        }
        st.current = Some(current);
    }

    /// Interrupts the schedulable.
    ///
    /// A schedulable blocked in `wait_for_next_release` is woken with
    /// [`WakeReason::Interrupted`]. A running one keeps the interrupt pending;
    /// if its parameters are rousable the pending interrupt also releases it
    /// at its next wait.
    pub fn interrupt(&self) {
        let rousable = self.release_parameters().rousable();
        let mut effects = Effects::default();
        {
            let mut st = self.state.lock();
            if st.state == ReleaseState::Terminated {
                return;
            }
            st.counters.interrupts += 1;
            st.interrupt_pending = true;
            if st.blocked || rousable {
                st.wake_interrupt = true;
                self.wake.notify_all();
            }
            debug!("{} interrupted", self.id);
            effects.records.push(TraceRecord::Interrupt { id: self.id });
        }
        self.dispatch(effects);
    }

    pub fn is_interrupted(&self) -> bool {
        self.state.lock().interrupt_pending
    }

    /// Clears a pending interrupt, returning whether there was one.
    pub fn clear_interrupted(&self) -> bool {
        std::mem::take(&mut self.state.lock().interrupt_pending)
    }

    /// Stops releases from taking effect and suspends enforcement.
    pub fn deschedule(&self) {
        self.state.lock().descheduled = true;
        debug!("{} descheduled", self.id);
        self.changed.notify_all();
    }

    /// Resumes releases and cost and deadline enforcement.
    pub fn reschedule(&self) {
        self.state.lock().descheduled = false;
        debug!("{} rescheduled", self.id);
        self.wake.notify_all();
        self.changed.notify_all();
    }

    /// Terminates the schedulable; a blocked wait returns an error.
    pub fn terminate(&self) {
        {
            let mut st = self.state.lock();
            if st.state == ReleaseState::Terminated {
                return;
            }
            st.state = ReleaseState::Terminated;
            st.current = None;
        }
        debug!("{} terminated", self.id);
        self.wake.notify_all();
        self.changed.notify_all();
    }

    /// Waits until the schedulable is blocked with nothing pending, or has
    /// terminated. Returns `false` on timeout.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut st = self.state.lock();
        loop {
            let idle = st.state == ReleaseState::Terminated
                || (st.blocked && st.queue.is_empty() && !st.wake_interrupt);
            if idle {
                return true;
            }
            if self.changed.wait_until(&mut st, deadline).timed_out() {
                return st.state == ReleaseState::Terminated
                    || (st.blocked && st.queue.is_empty() && !st.wake_interrupt);
            }
        }
    }

    pub(crate) fn attach(&self, scheduler: Weak<SchedulerInner>, trace: Option<TraceHook>) {
        let mut hooks = self.hooks.lock();
        hooks.scheduler = Some(scheduler);
        hooks.trace = trace;
    }

    pub(crate) fn detach(&self) {
        *self.hooks.lock() = Hooks::default();
    }

    pub(crate) fn set_trace(&self, trace: Option<TraceHook>) {
        self.hooks.lock().trace = trace;
    }

    pub(crate) fn trace(&self, record: TraceRecord) {
        let hook = self.hooks.lock().trace.clone();
        trace::emit(&hook, record);
    }

    fn notify_scheduler(&self) {
        let scheduler = self.hooks.lock().scheduler.as_ref().and_then(Weak::upgrade);
        if let Some(scheduler) = scheduler {
            scheduler.reevaluate(self.id);
        }
    }

    fn dispatch(&self, effects: Effects) {
        if !effects.records.is_empty() {
            let hook = self.hooks.lock().trace.clone();
            for record in effects.records {
                trace::emit(&hook, record);
            }
        }
        for (what, handler) in [("overrun", effects.overrun), ("miss", effects.miss)] {
            if let Some(handler) = handler {
                if let Err(err) = handler.release() {
                    warn!("{}: {what} handler not released: {err}", self.id);
                }
            }
        }
    }

    fn timing(&self) -> Timing {
        Timing::of(&self.release_parameters())
    }

    fn now(&self) -> i128 {
        self.clock.now().as_nanos()
    }

    fn instant(&self, at: i128) -> ScheduleResult<HighResolutionTime> {
        Ok(HighResolutionTime::from_nanos(
            TimeKind::Absolute,
            at,
            &self.clock,
        )?)
    }
}

impl Effects {
    fn is_empty(&self) -> bool {
        self.records.is_empty() && self.overrun.is_none() && self.miss.is_none()
    }
}

impl ParameterObserver for ReleaseControl {
    fn parameters_changed(&self, params: &ReleaseParameters) {
        if !params.ptr_eq(&self.params.lock()) {
            return;
        }
        let length = params.initial_queue_length();
        self.state.lock().queue.set_capacity(length);
        self.wake.notify_all();
        self.notify_scheduler();
    }
}

impl Drop for ReleaseControl {
    fn drop(&mut self) {
        self.params.get_mut().unbind(&self.observer);
    }
}

impl fmt::Debug for ReleaseControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.lock();
        f.debug_struct("ReleaseControl")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &st.state)
            .field("descheduled", &st.descheduled)
            .field("pending", &st.queue.len())
            .field("counters", &st.counters)
            .finish()
    }
}
