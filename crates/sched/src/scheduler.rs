//! The scheduler registry and its tick.
//!
//! A [`Scheduler`] keeps weak references to the schedulables added to it and
//! to the timers created on it. Each call to [`Scheduler::tick`] advances
//! every release engine to the current time of the scheduler's clock:
//! periodic releases are generated, executing releases are charged for the
//! elapsed time, deadlines are checked and due timers fire.
//!
//! The tick is driven either by hand (tests use a `ManualClock` and call
//! `tick()` directly) or by the background ticker started with
//! [`Scheduler::start_ticker`].

use core::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use rts_mem::MemoryParameters;
use rts_time::{ClockHandle, HighResolutionTime};

use crate::config::SchedulerConfig;
use crate::control::{ReleaseControl, ReleaseState, SchedulableId};
use crate::error::{ScheduleError, ScheduleResult};
use crate::params::PriorityParameters;
use crate::release::ReleaseParameters;
use crate::timer::TimerInner;
use crate::trace::{self, TraceHook, TraceRecord};

static DEFAULT_SCHEDULER: Lazy<Scheduler> =
    Lazy::new(|| Scheduler::new(SchedulerConfig::default()));

/// Anything the scheduler can release and account for.
pub trait Schedulable: Send + Sync {
    fn control(&self) -> &Arc<ReleaseControl>;

    fn scheduling_parameters(&self) -> PriorityParameters;

    fn memory_parameters(&self) -> Option<MemoryParameters> {
        None
    }

    fn id(&self) -> SchedulableId {
        self.control().id()
    }

    fn name(&self) -> &str {
        self.control().name()
    }

    fn release_parameters(&self) -> ReleaseParameters {
        self.control().release_parameters()
    }
}

/// Summary of one tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub now_ns: i128,
    /// Periodic releases generated.
    pub released: usize,
    pub overruns: usize,
    pub misses: usize,
    pub timers_fired: usize,
}

/// A registered schedulable as seen by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulableInfo {
    pub id: SchedulableId,
    pub name: String,
    pub priority: PriorityParameters,
    pub state: ReleaseState,
    /// Parameter changes the scheduler was notified of.
    pub reevaluations: u64,
}

struct Entry {
    id: SchedulableId,
    name: String,
    priority: PriorityParameters,
    control: Weak<ReleaseControl>,
    reevaluations: u64,
}

struct Ticker {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub(crate) struct SchedulerInner {
    config: SchedulerConfig,
    /// Highest priority first.
    entries: Mutex<Vec<Entry>>,
    timers: Mutex<Vec<Weak<TimerInner>>>,
    trace: Mutex<Option<TraceHook>>,
    ticker: Mutex<Option<Ticker>>,
    ticks: AtomicU64,
    shutdown: AtomicBool,
}

impl SchedulerInner {
    /// Records that the parameters of `id` changed.
    pub(crate) fn reevaluate(&self, id: SchedulableId) {
        let found = {
            let mut entries = self.entries.lock();
            match entries.iter_mut().find(|entry| entry.id == id) {
                Some(entry) => {
                    entry.reevaluations += 1;
                    true
                }
                None => false,
            }
        };
        if found {
            debug!("{}: reevaluating {id}", self.config.name);
            let hook = self.trace.lock().clone();
            trace::emit(&hook, TraceRecord::Reevaluate { id });
        }
    }
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.get_mut().take() {
            ticker.running.store(false, Ordering::Release);
        }
    }
}

/// Handle to a scheduler. Clones share the same registry.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        info!(
            "scheduler {} ready, priorities {}..={}",
            config.name, config.min_priority, config.max_priority
        );
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                entries: Mutex::new(Vec::new()),
                timers: Mutex::new(Vec::new()),
                trace: Mutex::new(None),
                ticker: Mutex::new(None),
                ticks: AtomicU64::new(0),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// The process-wide default scheduler, on the real-time clock.
    pub fn instance() -> Scheduler {
        DEFAULT_SCHEDULER.clone()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn clock(&self) -> &ClockHandle {
        &self.inner.config.clock
    }

    pub fn now(&self) -> HighResolutionTime {
        self.inner.config.clock.now()
    }

    pub(crate) fn now_nanos(&self) -> i128 {
        self.now().as_nanos()
    }

    pub fn tick_count(&self) -> u64 {
        self.inner.ticks.load(Ordering::Acquire)
    }

    pub fn set_trace_hook(&self, hook: Option<TraceHook>) {
        *self.inner.trace.lock() = hook.clone();
        for control in self.controls() {
            control.set_trace(hook.clone());
        }
    }

    pub(crate) fn trace(&self, record: TraceRecord) {
        let hook = self.inner.trace.lock().clone();
        trace::emit(&hook, record);
    }

    pub fn validate_priority(&self, priority: u8) -> ScheduleResult<()> {
        let config = &self.inner.config;
        if config.priority_range().contains(&priority) {
            Ok(())
        } else {
            Err(ScheduleError::InvalidPriority {
                priority,
                min: config.min_priority,
                max: config.max_priority,
            })
        }
    }

    /// Adds `schedulable`. Returns `false` if it was already added.
    pub fn add(&self, schedulable: &dyn Schedulable) -> ScheduleResult<bool> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(ScheduleError::ShutDown);
        }
        let priority = schedulable.scheduling_parameters();
        self.validate_priority(priority.priority)?;

        let control = schedulable.control();
        let mut entries = self.inner.entries.lock();
        entries.retain(|entry| entry.control.strong_count() > 0);
        if entries.iter().any(|entry| entry.id == control.id()) {
            return Ok(false);
        }
        control.attach(Arc::downgrade(&self.inner), self.inner.trace.lock().clone());
        let pos = entries
            .iter()
            .position(|entry| entry.priority.priority < priority.priority)
            .unwrap_or(entries.len());
        entries.insert(
            pos,
            Entry {
                id: control.id(),
                name: control.name().to_owned(),
                priority,
                control: Arc::downgrade(control),
                reevaluations: 0,
            },
        );
        debug!(
            "{}: added {} ({}) at priority {}",
            self.inner.config.name,
            control.id(),
            control.name(),
            priority.priority
        );
        Ok(true)
    }

    /// Removes `schedulable`. Returns whether it was registered.
    pub fn remove(&self, schedulable: &dyn Schedulable) -> bool {
        let id = schedulable.id();
        let removed = {
            let mut entries = self.inner.entries.lock();
            let before = entries.len();
            entries.retain(|entry| entry.id != id);
            entries.len() != before
        };
        if removed {
            schedulable.control().detach();
        }
        removed
    }

    pub fn contains(&self, id: SchedulableId) -> bool {
        self.inner.entries.lock().iter().any(|entry| entry.id == id)
    }

    pub fn len(&self) -> usize {
        let mut entries = self.inner.entries.lock();
        entries.retain(|entry| entry.control.strong_count() > 0);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live schedulables, highest priority first.
    pub fn schedulables(&self) -> Vec<SchedulableInfo> {
        let entries = self.inner.entries.lock();
        entries
            .iter()
            .filter_map(|entry| {
                let control = entry.control.upgrade()?;
                Some(SchedulableInfo {
                    id: entry.id,
                    name: entry.name.clone(),
                    priority: entry.priority,
                    state: control.state(),
                    reevaluations: entry.reevaluations,
                })
            })
            .collect()
    }

    pub fn reevaluation_count(&self, id: SchedulableId) -> Option<u64> {
        self.inner
            .entries
            .lock()
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.reevaluations)
    }

    pub(crate) fn register_timer(&self, timer: &Arc<TimerInner>) {
        let mut timers = self.inner.timers.lock();
        timers.retain(|timer| timer.strong_count() > 0);
        timers.push(Arc::downgrade(timer));
    }

    /// Advances every schedulable and timer to the clock's current time.
    pub fn tick(&self) -> TickReport {
        let now = self.now_nanos();
        let tick = self.inner.ticks.fetch_add(1, Ordering::AcqRel) + 1;
        let mut report = TickReport {
            tick,
            now_ns: now,
            ..TickReport::default()
        };

        let mut executing = false;
        for control in self.controls() {
            let outcome = control.on_tick(now);
            report.released += outcome.released;
            report.overruns += usize::from(outcome.overrun);
            report.misses += usize::from(outcome.missed);
            executing |= outcome.executing;
        }

        let timers: Vec<Arc<TimerInner>> = {
            let mut timers = self.inner.timers.lock();
            timers.retain(|timer| timer.strong_count() > 0);
            timers.iter().filter_map(Weak::upgrade).collect()
        };
        for timer in timers {
            report.timers_fired += timer.poll(now);
        }

        self.trace(TraceRecord::Tick { tick, at_ns: now });
        if !executing {
            if let Some(idle) = self.inner.config.idle_callback {
                idle();
            }
        }
        report
    }

    /// Starts a thread calling [`tick`](Self::tick) every configured quantum.
    ///
    /// Ticks are scheduled on absolute instants, so a slow tick does not
    /// shift the ones after it. Starting a running ticker has no effect.
    pub fn start_ticker(&self) -> ScheduleResult<()> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(ScheduleError::ShutDown);
        }
        let mut ticker = self.inner.ticker.lock();
        if ticker.is_some() {
            return Ok(());
        }
        let quantum = self.inner.config.quantum;
        if quantum.is_zero() {
            return Err(ScheduleError::InvalidParameter {
                name: "quantum",
                reason: "must be greater than zero",
            });
        }

        let running = Arc::new(AtomicBool::new(true));
        let weak = Arc::downgrade(&self.inner);
        let flag = running.clone();
        let handle = thread::Builder::new()
            .name(format!("{}-ticker", self.inner.config.name))
            .spawn(move || {
                let mut next_tick = Instant::now();
                while flag.load(Ordering::Acquire) {
                    next_tick += quantum;
                    let now = Instant::now();
                    if next_tick > now {
                        thread::sleep(next_tick - now);
                    }
                    let Some(inner) = weak.upgrade() else {
                        break;
                    };
                    if !flag.load(Ordering::Acquire) {
                        break;
                    }
                    Scheduler { inner }.tick();
                }
            })?;
        *ticker = Some(Ticker { running, handle });
        debug!("{}: ticker started, quantum {quantum:?}", self.inner.config.name);
        Ok(())
    }

    /// Stops the background ticker and waits for it to exit.
    pub fn stop_ticker(&self) {
        let ticker = self.inner.ticker.lock().take();
        if let Some(ticker) = ticker {
            ticker.running.store(false, Ordering::Release);
            let on_ticker = ticker.handle.thread().id() == thread::current().id();
            if !on_ticker && ticker.handle.join().is_err() {
                warn!("{}: ticker thread panicked", self.inner.config.name);
            }
        }
    }

    pub fn is_ticking(&self) -> bool {
        self.inner.ticker.lock().is_some()
    }

    /// Stops the ticker, terminates every registered schedulable and
    /// refuses further additions.
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop_ticker();
        let entries = std::mem::take(&mut *self.inner.entries.lock());
        for entry in &entries {
            if let Some(control) = entry.control.upgrade() {
                control.terminate();
                control.detach();
            }
        }
        info!(
            "scheduler {} shut down, {} schedulables terminated",
            self.inner.config.name,
            entries.len()
        );
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    fn controls(&self) -> Vec<Arc<ReleaseControl>> {
        let mut entries = self.inner.entries.lock();
        entries.retain(|entry| entry.control.strong_count() > 0);
        entries
            .iter()
            .filter_map(|entry| entry.control.upgrade())
            .collect()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.inner.config.name)
            .field("schedulables", &self.inner.entries.lock().len())
            .field("ticks", &self.tick_count())
            .finish()
    }
}
