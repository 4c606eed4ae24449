use core::cmp::Ordering;
use std::time::Duration;

use crate::clock::{ClockHandle, ManualClock};
use crate::error::TimeError;
use crate::hrt::{normalize, HighResolutionTime, TimeKind};

#[test]
fn normalize_carries_whole_millis() {
    assert_eq!(normalize(1, 2_500_000).unwrap(), (3, 500_000));
    assert_eq!(normalize(-1, -2_500_000).unwrap(), (-3, -500_000));
    assert_eq!(normalize(0, 999_999).unwrap(), (0, 999_999));
}

#[test]
fn normalize_aligns_signs() {
    assert_eq!(normalize(5, -1).unwrap(), (4, 999_999));
    assert_eq!(normalize(-5, 1).unwrap(), (-4, -999_999));
    assert_eq!(normalize(0, -7).unwrap(), (0, -7));
}

#[test]
fn normalize_reports_overflow() {
    assert_eq!(normalize(i64::MAX, 1_000_000), Err(TimeError::Overflow));
    assert_eq!(normalize(i64::MIN, -1_000_000), Err(TimeError::Overflow));
    assert!(normalize(i64::MAX, 999_999).is_ok());
}

#[test]
fn affine_arithmetic_kinds() {
    let clock = ManualClock::new("virtual").handle();
    let at = clock.absolute(100, 0).unwrap();
    let span = clock.relative(20, 500).unwrap();

    let later = at.add(&span).unwrap();
    assert_eq!(later.kind(), TimeKind::Absolute);
    assert_eq!((later.millis(), later.nanos()), (120, 500));

    let gap = later.subtract(&at).unwrap();
    assert_eq!(gap, span);

    assert!(matches!(
        at.add(&at),
        Err(TimeError::KindMismatch { op: "add", .. })
    ));
    assert!(matches!(
        span.subtract(&at),
        Err(TimeError::KindMismatch { op: "subtract", .. })
    ));
}

#[test]
fn add_overflow_is_an_error() {
    let clock = ClockHandle::realtime();
    let huge = HighResolutionTime::max_relative(&clock);
    let one = clock.millis(1);
    assert_eq!(huge.add(&one), Err(TimeError::Overflow));
}

#[test]
fn compare_requires_same_clock() {
    let a = ManualClock::new("a").handle();
    let b = ManualClock::new("b").handle();
    let x = a.millis(5);
    let y = b.millis(5);

    assert!(matches!(
        x.compare(&y),
        Err(TimeError::IncompatibleClock { .. })
    ));
    assert_eq!(x.partial_cmp(&y), None);
    assert_ne!(x, y);
    assert_eq!(x.compare(&a.millis(6)).unwrap(), Ordering::Less);
}

#[test]
fn conversions_consult_clock_reading() {
    let manual = ManualClock::new("virtual");
    let clock = manual.handle();
    manual.set_millis(1_000);

    let span = clock.millis(250);
    let at = span.to_absolute(&clock).unwrap();
    assert_eq!(at, clock.at_millis(1_250));

    manual.set_millis(1_100);
    let remaining = at.to_relative(&clock).unwrap();
    assert_eq!(remaining, clock.millis(150));
}

#[test]
fn set_is_all_or_nothing() {
    let mut value = HighResolutionTime::from_millis(10);
    assert_eq!(value.set(i64::MAX, 2_000_000), Err(TimeError::Overflow));
    assert_eq!(value.millis(), 10);

    value.set(3, 1_500_000).unwrap();
    assert_eq!((value.millis(), value.nanos()), (4, 500_000));
}

#[test]
fn duration_round_trip() {
    let clock = ClockHandle::realtime();
    let value = HighResolutionTime::from_duration(Duration::from_micros(2_500), &clock).unwrap();
    assert_eq!((value.millis(), value.nanos()), (2, 500_000));
    assert_eq!(value.to_duration(), Some(Duration::from_micros(2_500)));
    assert_eq!(clock.millis(-1).to_duration(), None);
}

#[test]
fn display_shows_components() {
    let value = HighResolutionTime::relative(12, 34).unwrap();
    assert_eq!(value.to_string(), "(12 ms, 34 ns, rel)");
}
