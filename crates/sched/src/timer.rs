//! Timers driven by the scheduler tick.
//!
//! A timer fires its [`AsyncEvent`] when its fire time passes. One-shot
//! timers fire once and stop; periodic timers fire every interval after the
//! first fire. Fire times are given relative to `start()` or as absolute
//! times on the scheduler's clock.
//!
//! A disabled timer keeps counting. Fires that fall due while it is disabled
//! are skipped, with one exception: the first fire of a timer started with an
//! absolute time is held and delivered on the first tick after `enable()`.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, trace, warn};
use parking_lot::Mutex;

use rts_time::{HighResolutionTime, TimeKind};

use crate::error::{ScheduleError, ScheduleResult};
use crate::event::AsyncEvent;
use crate::handler::AsyncEventHandler;
use crate::scheduler::Scheduler;
use crate::trace::TraceRecord;

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Period {
    OneShot,
    Every(i128),
}

#[derive(Debug)]
struct TimerState {
    time: HighResolutionTime,
    started: bool,
    enabled: bool,
    next_fire: Option<i128>,
    fired: u64,
    skipped: u64,
}

pub(crate) struct TimerInner {
    id: u64,
    period: Period,
    interval: Option<HighResolutionTime>,
    event: AsyncEvent,
    scheduler: Scheduler,
    state: Mutex<TimerState>,
}

/// Handle to a timer. Clones share the timer; the scheduler stops polling
/// it once every handle is dropped.
#[derive(Clone)]
pub struct Timer {
    inner: Arc<TimerInner>,
}

impl Timer {
    /// Timer that fires once at `time`.
    pub fn one_shot(scheduler: &Scheduler, time: HighResolutionTime) -> ScheduleResult<Self> {
        Self::create(scheduler, time, Period::OneShot, None)
    }

    /// Timer that first fires at `first` and then every `interval`.
    pub fn periodic(
        scheduler: &Scheduler,
        first: HighResolutionTime,
        interval: HighResolutionTime,
    ) -> ScheduleResult<Self> {
        if !interval.is_relative() || !interval.is_positive() {
            return Err(ScheduleError::InvalidParameter {
                name: "timer interval",
                reason: "must be a positive relative time",
            });
        }
        let period = Period::Every(interval.as_nanos());
        Self::create(scheduler, first, period, Some(interval))
    }

    fn create(
        scheduler: &Scheduler,
        time: HighResolutionTime,
        period: Period,
        interval: Option<HighResolutionTime>,
    ) -> ScheduleResult<Self> {
        validate_time(&time)?;
        let id = NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::new(TimerInner {
            id,
            period,
            interval,
            event: AsyncEvent::new(format!("timer-{id}")),
            scheduler: scheduler.clone(),
            state: Mutex::new(TimerState {
                time,
                started: false,
                enabled: true,
                next_fire: None,
                fired: 0,
                skipped: 0,
            }),
        });
        scheduler.register_timer(&inner);
        Ok(Self { inner })
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Event fired by this timer.
    pub fn event(&self) -> &AsyncEvent {
        &self.inner.event
    }

    pub fn add_handler(&self, handler: &AsyncEventHandler) {
        self.inner.event.add_handler(handler);
    }

    pub fn remove_handler(&self, handler: &AsyncEventHandler) -> bool {
        self.inner.event.remove_handler(handler)
    }

    pub fn is_periodic(&self) -> bool {
        matches!(self.inner.period, Period::Every(_))
    }

    pub fn interval(&self) -> Option<HighResolutionTime> {
        self.inner.interval.clone()
    }

    /// Starts counting towards the first fire.
    pub fn start(&self) -> ScheduleResult<()> {
        self.start_with(true)
    }

    /// Starts counting with firing disabled.
    pub fn start_disabled(&self) -> ScheduleResult<()> {
        self.start_with(false)
    }

    fn start_with(&self, enabled: bool) -> ScheduleResult<()> {
        let now = self.inner.scheduler.now_nanos();
        let mut st = self.inner.state.lock();
        if st.started {
            return Err(ScheduleError::TimerStarted);
        }
        st.started = true;
        st.enabled = enabled;
        st.next_fire = Some(fire_time(&st.time, now));
        debug!("timer-{} started, next fire at {:?} ns", self.inner.id, st.next_fire);
        Ok(())
    }

    /// Stops the timer. Returns whether it was running.
    pub fn stop(&self) -> bool {
        let mut st = self.inner.state.lock();
        let was_running = st.started;
        st.started = false;
        st.next_fire = None;
        was_running
    }

    pub fn enable(&self) {
        self.inner.state.lock().enabled = true;
    }

    pub fn disable(&self) {
        self.inner.state.lock().enabled = false;
    }

    pub fn is_running(&self) -> bool {
        let st = self.inner.state.lock();
        st.started && st.enabled
    }

    pub fn is_started(&self) -> bool {
        self.inner.state.lock().started
    }

    /// Changes the first fire time. A started timer restarts its count now.
    pub fn reschedule(&self, time: HighResolutionTime) -> ScheduleResult<()> {
        validate_time(&time)?;
        let now = self.inner.scheduler.now_nanos();
        let mut st = self.inner.state.lock();
        if st.started {
            st.next_fire = Some(fire_time(&time, now));
        }
        st.time = time;
        Ok(())
    }

    /// Absolute time of the next fire, if started.
    pub fn fire_time(&self) -> Option<HighResolutionTime> {
        let next = self.inner.state.lock().next_fire?;
        HighResolutionTime::from_nanos(TimeKind::Absolute, next, self.inner.scheduler.clock()).ok()
    }

    pub fn fire_count(&self) -> u64 {
        self.inner.state.lock().fired
    }

    /// Fires that fell due while the timer was disabled.
    pub fn skipped_count(&self) -> u64 {
        self.inner.state.lock().skipped
    }
}

impl TimerInner {
    /// Fires or skips every fire time up to `now`. Returns how many fired.
    pub(crate) fn poll(&self, now: i128) -> usize {
        let mut due = 0;
        {
            let mut st = self.state.lock();
            while st.started {
                let Some(next) = st.next_fire else {
                    break;
                };
                if next > now {
                    break;
                }
                if st.enabled {
                    st.fired += 1;
                    due += 1;
                } else if st.time.is_absolute() && st.fired == 0 && st.skipped == 0 {
                    // held until enabled
                    break;
                } else {
                    st.skipped += 1;
                    trace!("timer-{} skipped fire at {next} ns", self.id);
                }
                match self.period {
                    Period::Every(interval) => st.next_fire = Some(next + interval),
                    Period::OneShot => {
                        st.started = false;
                        st.next_fire = None;
                    }
                }
            }
        }

        for _ in 0..due {
            self.scheduler.trace(TraceRecord::TimerFire {
                timer: self.id,
                at_ns: now,
            });
            if let Err(err) = self.event.fire() {
                warn!("timer-{}: {err}", self.id);
            }
        }
        due
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.inner.state.lock();
        f.debug_struct("Timer")
            .field("id", &self.inner.id)
            .field("period", &self.inner.period)
            .field("started", &st.started)
            .field("enabled", &st.enabled)
            .field("next_fire", &st.next_fire)
            .field("fired", &st.fired)
            .finish()
    }
}

fn validate_time(time: &HighResolutionTime) -> ScheduleResult<()> {
    if time.is_relative() && time.is_negative() {
        return Err(ScheduleError::InvalidParameter {
            name: "timer time",
            reason: "relative time must not be negative",
        });
    }
    Ok(())
}

fn fire_time(time: &HighResolutionTime, now: i128) -> i128 {
    if time.is_absolute() {
        time.as_nanos()
    } else {
        now + time.as_nanos()
    }
}
