//! # rts-time
//!
//! High-resolution time values for the RTS runtime. A time value is a
//! millisecond/nanosecond pair bound to the clock that gives it meaning, and
//! tagged as either an absolute instant or a relative interval.
//!
//! ## Module Overview
//! - [`clock`] – Time bases: the process real-time clock and a manually
//!   driven virtual clock.
//! - [`hrt`]   – [`HighResolutionTime`] with normalization, arithmetic and
//!   clock-aware comparison.
//! - [`error`] – [`TimeError`] raised on overflow or incompatible operands.
//!
//! The scheduling and memory crates treat these values as opaque: they only
//! compare, add and subtract them, and ask a clock for its current reading.

pub mod clock;
pub mod error;
pub mod hrt;

pub use clock::{Clock, ClockHandle, ClockId, ManualClock, MonotonicClock, Reading};
pub use error::{TimeError, TimeResult};
pub use hrt::{normalize, HighResolutionTime, TimeKind, NANOS_PER_MILLI};

#[cfg(test)]
mod tests;
