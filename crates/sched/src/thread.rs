//! Real-time threads.
//!
//! A [`RealtimeThread`] is a schedulable backed by its own OS thread. It
//! inherits the scope stack of the thread that built it, runs its whole life
//! inside its initial memory area, and blocks until its first release before
//! running its logic. The logic drives later releases itself through
//! [`ReleaseContext::wait_for_next_release`].

use core::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error};
use parking_lot::Mutex;

use rts_mem::{InheritedStack, MemoryArea, MemoryParameters};
use rts_time::HighResolutionTime;

use crate::control::{NextRelease, ReleaseControl, ReleaseCounters, ReleaseState, SchedulableId};
use crate::error::{ScheduleError, ScheduleResult};
use crate::params::PriorityParameters;
use crate::queue::ArrivalOutcome;
use crate::release::ReleaseParameters;
use crate::scheduler::{Schedulable, Scheduler};

/// Thread logic. Runs once, starting in the first release.
pub type ThreadLogic = Box<dyn FnOnce(&ReleaseContext<'_>) + Send + 'static>;

/// The running thread's view of its own release engine.
pub struct ReleaseContext<'a> {
    control: &'a ReleaseControl,
}

impl ReleaseContext<'_> {
    pub fn id(&self) -> SchedulableId {
        self.control.id()
    }

    /// Completes the current release and blocks until the next one.
    pub fn wait_for_next_release(&self) -> ScheduleResult<NextRelease> {
        self.control.wait_for_next_release()
    }

    /// Charges execution time to the current release.
    pub fn charge(&self, amount: &HighResolutionTime) -> ScheduleResult<()> {
        self.control.charge(amount)
    }

    /// Cost consumed by the current release so far.
    pub fn consumed(&self) -> Option<HighResolutionTime> {
        self.control.consumed()
    }

    pub fn pending_releases(&self) -> usize {
        self.control.pending_releases()
    }

    pub fn is_interrupted(&self) -> bool {
        self.control.is_interrupted()
    }

    pub fn clear_interrupted(&self) -> bool {
        self.control.clear_interrupted()
    }

    pub fn state(&self) -> ReleaseState {
        self.control.state()
    }

    pub fn release_parameters(&self) -> ReleaseParameters {
        self.control.release_parameters()
    }
}

struct Pending {
    stack: InheritedStack,
    logic: ThreadLogic,
}

/// A schedulable OS thread.
pub struct RealtimeThread {
    control: Arc<ReleaseControl>,
    priority: PriorityParameters,
    memory: Option<MemoryParameters>,
    heap_allowed: bool,
    daemon: bool,
    stack_size: Option<usize>,
    pending: Mutex<Option<Pending>>,
    handle: Mutex<Option<JoinHandle<bool>>>,
}

impl RealtimeThread {
    pub fn builder(name: impl Into<String>) -> ThreadBuilder {
        ThreadBuilder {
            name: name.into(),
            priority: PriorityParameters::default(),
            release: None,
            memory: None,
            initial_area: None,
            heap_allowed: true,
            daemon: false,
            stack_size: None,
            scheduler: None,
            logic: None,
        }
    }

    pub fn id(&self) -> SchedulableId {
        self.control.id()
    }

    pub fn name(&self) -> &str {
        self.control.name()
    }

    /// Spawns the OS thread. It blocks until the first release.
    pub fn start(&self) -> ScheduleResult<()> {
        let Some(pending) = self.pending.lock().take() else {
            return Err(ScheduleError::AlreadyStarted(self.id()));
        };
        self.control.start()?;

        let control = self.control.clone();
        let memory = self.memory.clone();
        let mut builder = thread::Builder::new().name(format!("rts-{}", self.name()));
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }
        let spawned = builder.spawn(move || run(control, pending.stack, memory, pending.logic));
        match spawned {
            Ok(handle) => {
                *self.handle.lock() = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.control.terminate();
                Err(err.into())
            }
        }
    }

    /// Waits for the thread to finish.
    pub fn join(&self) -> ScheduleResult<()> {
        let handle = self.handle.lock().take();
        let Some(handle) = handle else {
            return Err(ScheduleError::InvalidState {
                id: self.id(),
                op: "join",
                state: self.state(),
            });
        };
        match handle.join() {
            Ok(false) => Ok(()),
            Ok(true) | Err(_) => Err(ScheduleError::LogicPanicked(self.id())),
        }
    }

    /// Releases an aperiodic or sporadic thread.
    pub fn release(&self) -> ScheduleResult<ArrivalOutcome> {
        self.control.release()
    }

    pub fn interrupt(&self) {
        self.control.interrupt();
    }

    pub fn deschedule(&self) {
        self.control.deschedule();
    }

    pub fn reschedule(&self) {
        self.control.reschedule();
    }

    /// Terminates the thread; its next wait for release fails.
    pub fn terminate(&self) {
        self.control.terminate();
    }

    pub fn state(&self) -> ReleaseState {
        self.control.state()
    }

    pub fn counters(&self) -> ReleaseCounters {
        self.control.counters()
    }

    pub fn pending_releases(&self) -> usize {
        self.control.pending_releases()
    }

    /// Waits until the thread is blocked with no release pending.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        self.control.wait_until_idle(timeout)
    }

    pub fn set_release_parameters(&self, params: ReleaseParameters) {
        self.control.set_release_parameters(params);
    }

    pub fn is_daemon(&self) -> bool {
        self.daemon
    }

    pub fn heap_allowed(&self) -> bool {
        self.heap_allowed
    }
}

impl Schedulable for RealtimeThread {
    fn control(&self) -> &Arc<ReleaseControl> {
        &self.control
    }

    fn scheduling_parameters(&self) -> PriorityParameters {
        self.priority
    }

    fn memory_parameters(&self) -> Option<MemoryParameters> {
        self.memory.clone()
    }
}

impl Drop for RealtimeThread {
    fn drop(&mut self) {
        // never started: nothing will consume releases
        if self.pending.get_mut().is_some() {
            self.control.terminate();
        }
    }
}

impl fmt::Debug for RealtimeThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeThread")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("priority", &self.priority)
            .field("state", &self.state())
            .field("daemon", &self.daemon)
            .finish()
    }
}

/// Builder for [`RealtimeThread`].
pub struct ThreadBuilder {
    name: String,
    priority: PriorityParameters,
    release: Option<ReleaseParameters>,
    memory: Option<MemoryParameters>,
    initial_area: Option<MemoryArea>,
    heap_allowed: bool,
    daemon: bool,
    stack_size: Option<usize>,
    scheduler: Option<Scheduler>,
    logic: Option<ThreadLogic>,
}

impl ThreadBuilder {
    pub fn priority(mut self, priority: PriorityParameters) -> Self {
        self.priority = priority;
        self
    }

    /// Defaults to aperiodic parameters.
    pub fn release(mut self, params: ReleaseParameters) -> Self {
        self.release = Some(params);
        self
    }

    pub fn memory(mut self, memory: MemoryParameters) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Area the thread runs in. Defaults to the builder's current area.
    pub fn initial_area(mut self, area: MemoryArea) -> Self {
        self.initial_area = Some(area);
        self
    }

    pub fn heap(mut self, allowed: bool) -> Self {
        self.heap_allowed = allowed;
        self
    }

    pub fn daemon(mut self, daemon: bool) -> Self {
        self.daemon = daemon;
        self
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    pub fn scheduler(mut self, scheduler: &Scheduler) -> Self {
        self.scheduler = Some(scheduler.clone());
        self
    }

    /// Logic run from the first release on. Without logic the thread just
    /// consumes releases until it is terminated.
    pub fn logic<F>(mut self, logic: F) -> Self
    where
        F: FnOnce(&ReleaseContext<'_>) + Send + 'static,
    {
        self.logic = Some(Box::new(logic));
        self
    }

    /// Captures the calling thread's scope stack and registers the thread.
    /// The OS thread is spawned by [`RealtimeThread::start`].
    pub fn build(self) -> ScheduleResult<RealtimeThread> {
        if let Some(scheduler) = &self.scheduler {
            scheduler.validate_priority(self.priority.priority)?;
        }
        let release = match self.release {
            Some(release) => release,
            None => ReleaseParameters::aperiodic().build()?,
        };
        let clock = match &self.scheduler {
            Some(scheduler) => scheduler.clock().clone(),
            None => release.clock(),
        };
        let initial = self.initial_area.unwrap_or_else(MemoryArea::current);
        let stack = InheritedStack::capture(&initial, self.heap_allowed)?;
        let logic: ThreadLogic = match self.logic {
            Some(logic) => logic,
            None => Box::new(consume_releases),
        };

        let thread = RealtimeThread {
            control: ReleaseControl::new(self.name, release, clock),
            priority: self.priority,
            memory: self.memory,
            heap_allowed: self.heap_allowed,
            daemon: self.daemon,
            stack_size: self.stack_size,
            pending: Mutex::new(Some(Pending { stack, logic })),
            handle: Mutex::new(None),
        };
        if let Some(scheduler) = &self.scheduler {
            scheduler.add(&thread)?;
        }
        Ok(thread)
    }
}

fn consume_releases(context: &ReleaseContext<'_>) {
    while context.wait_for_next_release().is_ok() {}
}

/// Body of the OS thread. Returns whether the logic panicked.
fn run(
    control: Arc<ReleaseControl>,
    stack: InheritedStack,
    memory: Option<MemoryParameters>,
    logic: ThreadLogic,
) -> bool {
    let initial = stack.initial_area().clone();
    let enter_initial = stack.enters_initial();
    let _context = stack.install(memory);

    let body = || {
        let context = ReleaseContext { control: &control };
        match control.wait_for_next_release() {
            Ok(_) => panic::catch_unwind(AssertUnwindSafe(|| logic(&context))),
            Err(err) => {
                debug!("{} ended before its first release: {err}", control.id());
                Ok(())
            }
        }
    };
    let outcome = if enter_initial {
        match initial.enter(body) {
            Ok(outcome) => outcome,
            Err(err) => {
                error!("{}: cannot enter {}: {err}", control.id(), initial);
                Ok(())
            }
        }
    } else {
        body()
    };

    control.terminate();
    if outcome.is_err() {
        error!("{}: thread logic panicked", control.id());
        return true;
    }
    false
}
