use thiserror::Error;

use crate::clock::ClockId;
use crate::hrt::TimeKind;

/// Errors raised by time arithmetic and comparison.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeError {
    #[error("millisecond component out of range")]
    Overflow,
    #[error("time values are bound to different clocks ({left:?} vs {right:?})")]
    IncompatibleClock { left: ClockId, right: ClockId },
    #[error("cannot {op} {left:?} and {right:?} times")]
    KindMismatch {
        op: &'static str,
        left: TimeKind,
        right: TimeKind,
    },
}

pub type TimeResult<T> = Result<T, TimeError>;
