//! Property tests for time normalization and arithmetic.

use proptest::prelude::*;
use rts_time::{normalize, ClockHandle, ManualClock, TimeKind};

const RANGE: i64 = i64::MAX / 4;

proptest! {
    #[test]
    fn normalized_components_share_sign(
        millis in -RANGE..RANGE,
        nanos in -10_000_000_000i64..10_000_000_000i64,
    ) {
        let (m, n) = normalize(millis, nanos).unwrap();
        prop_assert!(n.abs() < 1_000_000);
        prop_assert!(m == 0 || n == 0 || (m > 0) == (n > 0));
        prop_assert_eq!(
            i128::from(m) * 1_000_000 + i128::from(n),
            i128::from(millis) * 1_000_000 + i128::from(nanos)
        );
    }

    #[test]
    fn add_then_subtract_round_trips(
        a_ms in -RANGE..RANGE, a_ns in -999_999i64..999_999,
        b_ms in -RANGE..RANGE, b_ns in -999_999i64..999_999,
    ) {
        let clock = ClockHandle::realtime();
        let a = clock.relative(a_ms, a_ns).unwrap();
        let b = clock.relative(b_ms, b_ns).unwrap();
        let back = a.add(&b).unwrap().subtract(&b).unwrap();
        prop_assert_eq!(back, a);
    }

    #[test]
    fn absolute_shift_round_trips(at in -RANGE..RANGE, span in -RANGE..RANGE) {
        let clock = ManualClock::new("prop").handle();
        let instant = clock.at_millis(at);
        let delta = clock.millis(span);
        let moved = instant.add(&delta).unwrap();
        prop_assert_eq!(moved.kind(), TimeKind::Absolute);
        prop_assert_eq!(moved.subtract(&delta).unwrap(), instant);
    }
}
