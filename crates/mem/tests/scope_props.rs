//! Property tests for scope nesting and region accounting.

use proptest::prelude::*;
use rts_mem::{MemoryArea, MemoryError, ScopeParent, ScopeStack, ScopedMemory, SizeEstimator};

/// Enters `areas` one inside the other, checking counts and parents on the
/// way down.
fn enter_chain(areas: &[ScopedMemory], depth: usize) {
    let Some((first, rest)) = areas.split_first() else {
        assert_eq!(ScopeStack::current().depth(), depth + 1);
        return;
    };
    let expected_parent = ScopeStack::current()
        .innermost_scope()
        .map_or(ScopeParent::Primordial, |area| ScopeParent::Area(area.id()));
    first
        .enter(|| {
            assert_eq!(first.reference_count(), 1);
            assert_eq!(first.parent(), Some(expected_parent));
            enter_chain(rest, depth + 1);
        })
        .unwrap();
}

proptest! {
    #[test]
    fn nested_entries_reclaim_every_area(depth in 1usize..6, rounds in 1usize..4) {
        let areas: Vec<ScopedMemory> = (0..depth)
            .map(|_| ScopedMemory::new(128).unwrap())
            .collect();

        for _ in 0..rounds {
            enter_chain(&areas, 0);
        }

        for area in &areas {
            prop_assert_eq!(area.reference_count(), 0);
            prop_assert_eq!(area.parent(), None);
            prop_assert_eq!(area.reclaim_count(), rounds as u64);
        }
        prop_assert_eq!(ScopeStack::current().depth(), 1);
    }

    #[test]
    fn estimate_fits_exactly(words in 0usize..16, halves in 0usize..16, bytes in 0usize..16) {
        let mut estimator = SizeEstimator::new();
        estimator
            .reserve::<u64>(words)
            .reserve_array::<u16>(halves)
            .reserve_bytes(bytes);
        let area = ScopedMemory::from_estimator(&estimator).unwrap();

        area.enter(|| {
            for i in 0..words {
                area.allocate(i as u64).unwrap();
            }
            area.allocate_array(halves, |i| i as u16).unwrap();
            area.allocate_array(bytes, |i| i as u8).unwrap();
            assert_eq!(area.memory_remaining(), 0);
            assert!(matches!(
                area.allocate(0u8),
                Err(MemoryError::OutOfMemory { requested: 1, remaining: 0, .. })
            ));
        })
        .unwrap();
    }

    #[test]
    fn consumption_never_exceeds_maximum(
        size in 0usize..256,
        requests in prop::collection::vec(0usize..64, 0..32),
    ) {
        let area = ScopedMemory::new(size).unwrap();
        area.enter(|| {
            let mut accepted = 0usize;
            for len in requests {
                if area.allocate_array(len, |_| 0u8).is_ok() {
                    accepted += len;
                }
                assert!(area.memory_consumed() <= area.maximum_size());
            }
            assert_eq!(area.memory_consumed(), accepted);
        })
        .unwrap();
        prop_assert_eq!(area.memory_consumed(), 0);
        prop_assert_eq!(MemoryArea::current(), MemoryArea::heap());
    }
}
