//! High-resolution time values.
//!
//! A [`HighResolutionTime`] is either an absolute instant or a relative
//! interval on a particular clock. The millisecond and nanosecond components
//! are kept normalized: `|nanos| < 1_000_000` and both components share a
//! sign (or one of them is zero).
//!
//! Arithmetic follows the usual affine rules:
//!
//! | left      | op | right     | result    |
//! |-----------|----|-----------|-----------|
//! | absolute  | +  | relative  | absolute  |
//! | relative  | +  | relative  | relative  |
//! | absolute  | -  | absolute  | relative  |
//! | absolute  | -  | relative  | absolute  |
//! | relative  | -  | relative  | relative  |
//!
//! Every other combination is rejected with [`TimeError::KindMismatch`].

use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::clock::{ClockHandle, Reading};
use crate::error::{TimeError, TimeResult};

pub const NANOS_PER_MILLI: i64 = 1_000_000;

/// Whether a time value names an instant or an interval.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeKind {
    Absolute,
    Relative,
}

/// Normalizes a millisecond/nanosecond pair.
///
/// Whole milliseconds are carried out of `nanos`, then the components are
/// adjusted so they share a sign. Fails with [`TimeError::Overflow`] when the
/// millisecond component leaves the `i64` range.
pub fn normalize(millis: i64, nanos: i64) -> TimeResult<(i64, i32)> {
    let carry = nanos / NANOS_PER_MILLI;
    let mut nanos = nanos % NANOS_PER_MILLI;
    let mut millis = millis.checked_add(carry).ok_or(TimeError::Overflow)?;

    if millis > 0 && nanos < 0 {
        millis -= 1;
        nanos += NANOS_PER_MILLI;
    } else if millis < 0 && nanos > 0 {
        millis += 1;
        nanos -= NANOS_PER_MILLI;
    }

    Ok((millis, nanos as i32))
}

/// Millisecond + nanosecond time value bound to a clock.
#[derive(Clone)]
pub struct HighResolutionTime {
    kind: TimeKind,
    millis: i64,
    nanos: i32,
    clock: ClockHandle,
}

impl HighResolutionTime {
    pub fn new(kind: TimeKind, millis: i64, nanos: i64, clock: &ClockHandle) -> TimeResult<Self> {
        let (millis, nanos) = normalize(millis, nanos)?;
        Ok(Self {
            kind,
            millis,
            nanos,
            clock: clock.clone(),
        })
    }

    /// Relative interval on the real-time clock.
    pub fn relative(millis: i64, nanos: i64) -> TimeResult<Self> {
        Self::new(TimeKind::Relative, millis, nanos, &ClockHandle::realtime())
    }

    /// Absolute instant on the real-time clock.
    pub fn absolute(millis: i64, nanos: i64) -> TimeResult<Self> {
        Self::new(TimeKind::Absolute, millis, nanos, &ClockHandle::realtime())
    }

    /// Relative interval of whole milliseconds on the real-time clock.
    pub fn from_millis(millis: i64) -> Self {
        Self {
            kind: TimeKind::Relative,
            millis,
            nanos: 0,
            clock: ClockHandle::realtime(),
        }
    }

    /// Relative zero on the real-time clock.
    pub fn zero() -> Self {
        Self::from_millis(0)
    }

    /// Largest representable relative interval.
    ///
    /// Used as the deadline of schedulables that do not state one.
    pub fn max_relative(clock: &ClockHandle) -> Self {
        Self {
            kind: TimeKind::Relative,
            millis: i64::MAX,
            nanos: 999_999,
            clock: clock.clone(),
        }
    }

    pub fn from_duration(duration: Duration, clock: &ClockHandle) -> TimeResult<Self> {
        let nanos = i128::try_from(duration.as_nanos()).map_err(|_| TimeError::Overflow)?;
        Self::from_nanos(TimeKind::Relative, nanos, clock)
    }

    /// Builds a value from a total nanosecond count.
    pub fn from_nanos(kind: TimeKind, total: i128, clock: &ClockHandle) -> TimeResult<Self> {
        let per_milli = i128::from(NANOS_PER_MILLI);
        let millis = i64::try_from(total / per_milli).map_err(|_| TimeError::Overflow)?;
        let nanos = (total % per_milli) as i32;
        Ok(Self {
            kind,
            millis,
            nanos,
            clock: clock.clone(),
        })
    }

    pub(crate) fn from_reading(kind: TimeKind, reading: Reading, clock: ClockHandle) -> Self {
        let (millis, nanos) =
            normalize(reading.millis, i64::from(reading.nanos)).unwrap_or((i64::MAX, 999_999));
        Self {
            kind,
            millis,
            nanos,
            clock,
        }
    }

    pub fn kind(&self) -> TimeKind {
        self.kind
    }

    pub fn millis(&self) -> i64 {
        self.millis
    }

    pub fn nanos(&self) -> i32 {
        self.nanos
    }

    pub fn clock(&self) -> &ClockHandle {
        &self.clock
    }

    pub fn is_absolute(&self) -> bool {
        self.kind == TimeKind::Absolute
    }

    pub fn is_relative(&self) -> bool {
        self.kind == TimeKind::Relative
    }

    pub fn is_zero(&self) -> bool {
        self.millis == 0 && self.nanos == 0
    }

    pub fn is_negative(&self) -> bool {
        self.millis < 0 || self.nanos < 0
    }

    pub fn is_positive(&self) -> bool {
        self.millis > 0 || self.nanos > 0
    }

    /// Total value in nanoseconds.
    pub fn as_nanos(&self) -> i128 {
        i128::from(self.millis) * i128::from(NANOS_PER_MILLI) + i128::from(self.nanos)
    }

    /// Converts a non-negative value to a [`Duration`].
    pub fn to_duration(&self) -> Option<Duration> {
        if self.is_negative() {
            return None;
        }
        let nanos = u64::try_from(self.as_nanos()).ok()?;
        Some(Duration::from_nanos(nanos))
    }

    /// Replaces both components in place. On error the value is unchanged.
    pub fn set(&mut self, millis: i64, nanos: i64) -> TimeResult<()> {
        let (millis, nanos) = normalize(millis, nanos)?;
        self.millis = millis;
        self.nanos = nanos;
        Ok(())
    }

    /// Same numeric value re-associated with `clock`.
    pub fn on_clock(&self, clock: &ClockHandle) -> Self {
        Self {
            clock: clock.clone(),
            ..self.clone()
        }
    }

    pub fn add(&self, other: &Self) -> TimeResult<Self> {
        self.check_clock(other)?;
        let kind = match (self.kind, other.kind) {
            (TimeKind::Absolute, TimeKind::Relative) | (TimeKind::Relative, TimeKind::Absolute) => {
                TimeKind::Absolute
            }
            (TimeKind::Relative, TimeKind::Relative) => TimeKind::Relative,
            (left, right) => {
                return Err(TimeError::KindMismatch {
                    op: "add",
                    left,
                    right,
                })
            }
        };
        Self::from_nanos(kind, self.as_nanos() + other.as_nanos(), &self.clock)
    }

    pub fn subtract(&self, other: &Self) -> TimeResult<Self> {
        self.check_clock(other)?;
        let kind = match (self.kind, other.kind) {
            (TimeKind::Absolute, TimeKind::Absolute) => TimeKind::Relative,
            (TimeKind::Absolute, TimeKind::Relative) => TimeKind::Absolute,
            (TimeKind::Relative, TimeKind::Relative) => TimeKind::Relative,
            (left, right) => {
                return Err(TimeError::KindMismatch {
                    op: "subtract",
                    left,
                    right,
                })
            }
        };
        Self::from_nanos(kind, self.as_nanos() - other.as_nanos(), &self.clock)
    }

    /// Orders two values of the same kind on the same clock.
    pub fn compare(&self, other: &Self) -> TimeResult<Ordering> {
        self.check_clock(other)?;
        if self.kind != other.kind {
            return Err(TimeError::KindMismatch {
                op: "compare",
                left: self.kind,
                right: other.kind,
            });
        }
        Ok((self.millis, self.nanos).cmp(&(other.millis, other.nanos)))
    }

    /// Absolute form of this value on `clock`.
    ///
    /// Relative values are measured from the clock's current reading.
    pub fn to_absolute(&self, clock: &ClockHandle) -> TimeResult<Self> {
        match self.kind {
            TimeKind::Absolute => Ok(self.on_clock(clock)),
            TimeKind::Relative => clock.now().add(&self.on_clock(clock)),
        }
    }

    /// Relative form of this value on `clock`.
    ///
    /// Absolute values become the interval from the clock's current reading.
    pub fn to_relative(&self, clock: &ClockHandle) -> TimeResult<Self> {
        match self.kind {
            TimeKind::Absolute => self.on_clock(clock).subtract(&clock.now()),
            TimeKind::Relative => Ok(self.on_clock(clock)),
        }
    }

    fn check_clock(&self, other: &Self) -> TimeResult<()> {
        if self.clock == other.clock {
            Ok(())
        } else {
            Err(TimeError::IncompatibleClock {
                left: self.clock.id(),
                right: other.clock.id(),
            })
        }
    }
}

impl PartialEq for HighResolutionTime {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.millis == other.millis
            && self.nanos == other.nanos
            && self.clock == other.clock
    }
}

impl Eq for HighResolutionTime {}

impl PartialOrd for HighResolutionTime {
    /// `None` when the values live on different clocks or differ in kind.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.compare(other).ok()
    }
}

impl Hash for HighResolutionTime {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.millis.hash(state);
        self.nanos.hash(state);
        self.clock.id().hash(state);
    }
}

impl fmt::Debug for HighResolutionTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HighResolutionTime")
            .field("kind", &self.kind)
            .field("millis", &self.millis)
            .field("nanos", &self.nanos)
            .field("clock", &self.clock.id())
            .finish()
    }
}

impl fmt::Display for HighResolutionTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            TimeKind::Absolute => "abs",
            TimeKind::Relative => "rel",
        };
        write!(f, "({} ms, {} ns, {kind})", self.millis, self.nanos)
    }
}
