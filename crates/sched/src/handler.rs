//! Asynchronous event handlers.
//!
//! A handler is a schedulable whose logic runs once per release. Releases
//! come from the events it is attached to, from timers, or from direct
//! `release()` calls. Each handler owns one server thread, so its logic is
//! never run concurrently with itself; arrivals that come in while the logic
//! runs are queued and counted as pending fires.
//!
//! A panic in the logic is caught and logged. The handler keeps serving later
//! releases.

use core::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error};
use parking_lot::Mutex;

use rts_mem::{InheritedStack, MemoryArea, MemoryParameters};
use rts_time::HighResolutionTime;

use crate::control::{NextRelease, ReleaseControl, ReleaseCounters, SchedulableId};
use crate::error::ScheduleResult;
use crate::params::PriorityParameters;
use crate::queue::ArrivalOutcome;
use crate::release::ReleaseParameters;
use crate::scheduler::{Schedulable, Scheduler};
use crate::trace::TraceRecord;

/// Handler logic.
pub type HandlerLogic = Box<dyn FnMut(&HandlerContext<'_>) + Send + 'static>;

/// View of the running release handed to handler logic.
pub struct HandlerContext<'a> {
    control: &'a ReleaseControl,
    release: &'a NextRelease,
}

impl HandlerContext<'_> {
    pub fn id(&self) -> SchedulableId {
        self.control.id()
    }

    /// Fires that arrived and are still waiting to be handled, including the
    /// one being handled now.
    pub fn fire_count(&self) -> usize {
        self.control.pending_releases() + 1
    }

    /// Claims every waiting fire for this run of the logic. Returns how many
    /// were taken.
    pub fn take_pending_fire_count(&self) -> usize {
        self.control.take_pending_releases()
    }

    /// Drops the waiting fires without handling them.
    pub fn clear_pending_fire_count(&self) {
        self.control.take_pending_releases();
    }

    /// Nominal time of the release being handled.
    pub fn release_time(&self) -> &HighResolutionTime {
        &self.release.release_time
    }

    /// Charges execution time to the current release.
    pub fn charge(&self, amount: &HighResolutionTime) -> ScheduleResult<()> {
        self.control.charge(amount)
    }

    pub fn release_parameters(&self) -> ReleaseParameters {
        self.control.release_parameters()
    }

    pub fn is_interrupted(&self) -> bool {
        self.control.is_interrupted()
    }
}

#[derive(Default)]
struct HandlerStats {
    handled: AtomicU64,
    panics: AtomicU64,
    skipped: AtomicU64,
}

struct HandlerInner {
    control: Arc<ReleaseControl>,
    priority: PriorityParameters,
    memory: Option<MemoryParameters>,
    heap_allowed: bool,
    stats: Arc<HandlerStats>,
    server: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for HandlerInner {
    fn drop(&mut self) {
        self.control.terminate();
    }
}

/// Handle to an asynchronous event handler. Clones share the handler.
#[derive(Clone)]
pub struct AsyncEventHandler {
    inner: Arc<HandlerInner>,
}

impl AsyncEventHandler {
    pub fn builder(name: impl Into<String>) -> HandlerBuilder {
        HandlerBuilder {
            name: name.into(),
            release: None,
            priority: PriorityParameters::default(),
            memory: None,
            initial_area: None,
            heap_allowed: true,
            scheduler: None,
        }
    }

    pub fn id(&self) -> SchedulableId {
        self.inner.control.id()
    }

    pub fn name(&self) -> &str {
        self.inner.control.name()
    }

    /// Releases the handler once. Never blocks.
    pub fn release(&self) -> ScheduleResult<ArrivalOutcome> {
        self.inner.control.release()
    }

    /// Fires queued but not yet handled.
    pub fn fire_count(&self) -> usize {
        self.inner.control.pending_releases()
    }

    /// Completed runs of the logic, including ones that panicked.
    pub fn handled_count(&self) -> u64 {
        self.inner.stats.handled.load(Ordering::Acquire)
    }

    pub fn panic_count(&self) -> u64 {
        self.inner.stats.panics.load(Ordering::Acquire)
    }

    /// Releases dropped because the initial area could not be entered.
    pub fn skipped_count(&self) -> u64 {
        self.inner.stats.skipped.load(Ordering::Acquire)
    }

    pub fn counters(&self) -> ReleaseCounters {
        self.inner.control.counters()
    }

    pub fn heap_allowed(&self) -> bool {
        self.inner.heap_allowed
    }

    /// Waits until every fire so far has been handled.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        self.inner.control.wait_until_idle(timeout)
    }

    pub fn deschedule(&self) {
        self.inner.control.deschedule();
    }

    pub fn reschedule(&self) {
        self.inner.control.reschedule();
    }

    /// Stops the server thread after the running release, if any, and
    /// waits for it unless called from the handler's own logic.
    pub fn terminate(&self) {
        self.inner.control.terminate();
        let server = self.inner.server.lock().take();
        if let Some(server) = server {
            if server.thread().id() != thread::current().id() && server.join().is_err() {
                error!("{}: server thread panicked", self.id());
            }
        }
    }

    /// Whether both handles refer to the same handler.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Schedulable for AsyncEventHandler {
    fn control(&self) -> &Arc<ReleaseControl> {
        &self.inner.control
    }

    fn scheduling_parameters(&self) -> PriorityParameters {
        self.inner.priority
    }

    fn memory_parameters(&self) -> Option<MemoryParameters> {
        self.inner.memory.clone()
    }
}

impl PartialEq for AsyncEventHandler {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for AsyncEventHandler {}

impl fmt::Debug for AsyncEventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncEventHandler")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("priority", &self.inner.priority.priority)
            .field("pending", &self.fire_count())
            .finish()
    }
}

/// Builder for [`AsyncEventHandler`].
pub struct HandlerBuilder {
    name: String,
    release: Option<ReleaseParameters>,
    priority: PriorityParameters,
    memory: Option<MemoryParameters>,
    initial_area: Option<MemoryArea>,
    heap_allowed: bool,
    scheduler: Option<Scheduler>,
}

impl HandlerBuilder {
    /// Defaults to aperiodic parameters with an unlimited growing queue.
    pub fn release(mut self, params: ReleaseParameters) -> Self {
        self.release = Some(params);
        self
    }

    pub fn priority(mut self, priority: PriorityParameters) -> Self {
        self.priority = priority;
        self
    }

    pub fn memory(mut self, memory: MemoryParameters) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Area the logic allocates in. Defaults to the builder's current area.
    pub fn initial_area(mut self, area: MemoryArea) -> Self {
        self.initial_area = Some(area);
        self
    }

    /// Whether the logic may touch the heap.
    pub fn heap(mut self, allowed: bool) -> Self {
        self.heap_allowed = allowed;
        self
    }

    /// Adds the handler to `scheduler`, validating its priority.
    pub fn scheduler(mut self, scheduler: &Scheduler) -> Self {
        self.scheduler = Some(scheduler.clone());
        self
    }

    /// Starts the server thread and returns the handler, ready for release.
    pub fn build<F>(self, logic: F) -> ScheduleResult<AsyncEventHandler>
    where
        F: FnMut(&HandlerContext<'_>) + Send + 'static,
    {
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

        let control = ReleaseControl::new(self.name.clone(), release, clock);
        control.start()?;
        let stats = Arc::new(HandlerStats::default());

        let server = {
            let control = control.clone();
            let stats = stats.clone();
            let memory = self.memory.clone();
            let logic: HandlerLogic = Box::new(logic);
            thread::Builder::new()
                .name(format!("rts-handler-{}", self.name))
                .spawn(move || serve(control, stats, stack, memory, logic))?
        };

        let handler = AsyncEventHandler {
            inner: Arc::new(HandlerInner {
                control,
                priority: self.priority,
                memory: self.memory,
                heap_allowed: self.heap_allowed,
                stats,
                server: Mutex::new(Some(server)),
            }),
        };
        if let Some(scheduler) = &self.scheduler {
            scheduler.add(&handler)?;
        }
        debug!("{} ({}) ready", handler.id(), handler.name());
        Ok(handler)
    }
}

fn serve(
    control: Arc<ReleaseControl>,
    stats: Arc<HandlerStats>,
    stack: InheritedStack,
    memory: Option<MemoryParameters>,
    mut logic: HandlerLogic,
) {
    let initial = stack.initial_area().clone();
    let enter_initial = stack.enters_initial();
    let _context = stack.install(memory);

    while let Ok(release) = control.wait_for_next_release() {
        let context = HandlerContext {
            control: &control,
            release: &release,
        };
        let mut run = || panic::catch_unwind(AssertUnwindSafe(|| logic(&context)));
        let outcome = if enter_initial {
            match initial.enter(run) {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!("{}: cannot enter {}: {err}", control.id(), initial);
                    stats.skipped.fetch_add(1, Ordering::AcqRel);
                    control.trace(TraceRecord::HandlerSkipped { id: control.id() });
                    continue;
                }
            }
        } else {
            run()
        };
        if outcome.is_err() {
            stats.panics.fetch_add(1, Ordering::AcqRel);
            error!("{}: handler logic panicked", control.id());
            control.trace(TraceRecord::HandlerPanic { id: control.id() });
        }
        stats.handled.fetch_add(1, Ordering::AcqRel);
    }
    debug!("{} server stopped", control.id());
}
