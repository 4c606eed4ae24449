//! Time bases.
//!
//! Every [`HighResolutionTime`] carries a [`ClockHandle`]. Two clocks are the
//! same time base only if they share a [`ClockId`]; numeric equality of their
//! readings means nothing across clocks.

use core::fmt;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

use crate::error::TimeResult;
use crate::hrt::{HighResolutionTime, TimeKind, NANOS_PER_MILLI};

static NEXT_CLOCK_ID: AtomicU32 = AtomicU32::new(1);

static REALTIME: Lazy<ClockHandle> =
    Lazy::new(|| ClockHandle::new(Arc::new(MonotonicClock::new("realtime"))));

/// Process-unique identifier of a clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockId(pub u32);

impl ClockId {
    /// Allocates a fresh identifier.
    pub fn next() -> Self {
        Self(NEXT_CLOCK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ClockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "clock#{}", self.0)
    }
}

/// Raw clock reading since the clock's epoch.
///
/// `nanos` is always within `0..1_000_000`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Reading {
    pub millis: i64,
    pub nanos: i32,
}

impl Reading {
    pub const fn new(millis: i64, nanos: i32) -> Self {
        Self { millis, nanos }
    }

    fn from_total_nanos(total: i64) -> Self {
        Self {
            millis: total.div_euclid(NANOS_PER_MILLI),
            nanos: total.rem_euclid(NANOS_PER_MILLI) as i32,
        }
    }

    fn from_duration(elapsed: Duration) -> Self {
        let millis = i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX);
        Self {
            millis,
            nanos: (elapsed.subsec_nanos() % NANOS_PER_MILLI as u32) as i32,
        }
    }
}

/// A time base.
pub trait Clock: Send + Sync {
    fn id(&self) -> ClockId;
    fn name(&self) -> &str;
    /// Current reading of this clock.
    fn read(&self) -> Reading;
    /// Smallest interval the clock can distinguish.
    fn resolution(&self) -> Reading;
}

/// Monotonic real-time clock anchored at its creation instant.
pub struct MonotonicClock {
    id: ClockId,
    name: String,
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ClockId::next(),
            name: name.into(),
            epoch: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn id(&self) -> ClockId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self) -> Reading {
        Reading::from_duration(self.epoch.elapsed())
    }

    fn resolution(&self) -> Reading {
        Reading::new(0, 1)
    }
}

/// Virtual clock that only moves when told to.
///
/// Used to drive the release engine deterministically.
pub struct ManualClock {
    id: ClockId,
    name: String,
    nanos: AtomicI64,
}

impl ManualClock {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: ClockId::next(),
            name: name.into(),
            nanos: AtomicI64::new(0),
        })
    }

    /// Handle suitable for binding time values to this clock.
    pub fn handle(self: &Arc<Self>) -> ClockHandle {
        ClockHandle::new(Arc::clone(self) as Arc<dyn Clock>)
    }

    pub fn set_millis(&self, millis: i64) {
        self.nanos
            .store(millis.saturating_mul(NANOS_PER_MILLI), Ordering::SeqCst);
    }

    pub fn set(&self, millis: i64, nanos: i32) {
        let total = millis
            .saturating_mul(NANOS_PER_MILLI)
            .saturating_add(i64::from(nanos));
        self.nanos.store(total, Ordering::SeqCst);
    }

    pub fn advance_millis(&self, millis: i64) {
        self.advance_nanos(millis.saturating_mul(NANOS_PER_MILLI));
    }

    pub fn advance_nanos(&self, nanos: i64) {
        self.nanos.fetch_add(nanos, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn id(&self) -> ClockId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self) -> Reading {
        Reading::from_total_nanos(self.nanos.load(Ordering::SeqCst))
    }

    fn resolution(&self) -> Reading {
        Reading::new(0, 1)
    }
}

/// Shared, identity-compared reference to a clock.
#[derive(Clone)]
pub struct ClockHandle {
    clock: Arc<dyn Clock>,
}

impl ClockHandle {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// The default real-time clock of the process.
    pub fn realtime() -> Self {
        REALTIME.clone()
    }

    pub fn id(&self) -> ClockId {
        self.clock.id()
    }

    pub fn name(&self) -> &str {
        self.clock.name()
    }

    pub fn reading(&self) -> Reading {
        self.clock.read()
    }

    /// Current time of this clock as an absolute value bound to it.
    pub fn now(&self) -> HighResolutionTime {
        let reading = self.clock.read();
        HighResolutionTime::from_reading(TimeKind::Absolute, reading, self.clone())
    }

    /// Clock resolution as a relative value bound to it.
    pub fn resolution(&self) -> HighResolutionTime {
        let reading = self.clock.resolution();
        HighResolutionTime::from_reading(TimeKind::Relative, reading, self.clone())
    }

    /// Relative interval of `millis` on this clock.
    pub fn millis(&self, millis: i64) -> HighResolutionTime {
        HighResolutionTime::from_reading(TimeKind::Relative, Reading::new(millis, 0), self.clone())
    }

    /// Absolute instant `millis` after this clock's epoch.
    pub fn at_millis(&self, millis: i64) -> HighResolutionTime {
        HighResolutionTime::from_reading(TimeKind::Absolute, Reading::new(millis, 0), self.clone())
    }

    /// Relative interval on this clock.
    pub fn relative(&self, millis: i64, nanos: i64) -> TimeResult<HighResolutionTime> {
        HighResolutionTime::new(TimeKind::Relative, millis, nanos, self)
    }

    /// Absolute instant on this clock.
    pub fn absolute(&self, millis: i64, nanos: i64) -> TimeResult<HighResolutionTime> {
        HighResolutionTime::new(TimeKind::Absolute, millis, nanos, self)
    }
}

impl PartialEq for ClockHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for ClockHandle {}

impl fmt::Debug for ClockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClockHandle")
            .field("id", &self.id())
            .field("name", &self.name())
            .finish()
    }
}
