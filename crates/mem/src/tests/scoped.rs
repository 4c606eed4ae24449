use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Duration;

use rts_time::{ClockHandle, HighResolutionTime};

use crate::area::MemoryArea;
use crate::error::MemoryError;
use crate::reference::AreaRef;
use crate::scoped::{ScopeParent, ScopedMemory};

#[test]
fn first_entry_fixes_the_parent() {
    let outer = ScopedMemory::new(64).unwrap();
    let inner = ScopedMemory::new(64).unwrap();
    assert_eq!(outer.parent(), None);

    outer
        .enter(|| {
            assert_eq!(outer.parent(), Some(ScopeParent::Primordial));
            inner
                .enter(|| assert_eq!(inner.parent(), Some(ScopeParent::Area(outer.id()))))
                .unwrap();
        })
        .unwrap();

    assert_eq!(outer.parent(), None);
    assert_eq!(inner.parent(), None);
}

#[test]
fn reentry_from_another_scope_is_a_cycle() {
    let a = ScopedMemory::new(64).unwrap();
    let b = ScopedMemory::new(64).unwrap();
    let c = ScopedMemory::new(64).unwrap();

    a.enter(|| {
        b.enter(|| {
            c.enter(|| {
                let err = b.enter(|| ()).unwrap_err();
                assert_eq!(
                    err,
                    MemoryError::ScopedCycle {
                        area: b.id(),
                        parent: ScopeParent::Area(a.id()),
                        current: ScopeParent::Area(c.id()),
                    }
                );
                assert_eq!(b.reference_count(), 1);
            })
            .unwrap();
        })
        .unwrap();
    })
    .unwrap();
}

#[test]
fn same_parent_may_enter_repeatedly() {
    let outer = ScopedMemory::new(64).unwrap();
    let inner = ScopedMemory::new(64).unwrap();

    outer
        .enter(|| {
            inner.enter(|| inner.enter(|| ()).unwrap_err()).unwrap();
            inner.enter(|| ()).unwrap();
            inner.enter(|| ()).unwrap();
        })
        .unwrap();
    assert_eq!(inner.reclaim_count(), 3);
}

#[test]
fn parent_is_forgotten_after_reclamation() {
    let outer = ScopedMemory::new(64).unwrap();
    let inner = ScopedMemory::new(64).unwrap();

    outer.enter(|| inner.enter(|| ()).unwrap()).unwrap();
    inner
        .enter(|| assert_eq!(inner.parent(), Some(ScopeParent::Primordial)))
        .unwrap();
}

#[test]
fn heap_frames_do_not_count_as_parents() {
    let scoped = ScopedMemory::new(64).unwrap();
    MemoryArea::immortal()
        .enter(|| {
            scoped
                .enter(|| assert_eq!(scoped.parent(), Some(ScopeParent::Primordial)))
                .unwrap();
        })
        .unwrap();
}

#[test]
fn concurrent_entries_share_one_lineage() {
    let area = ScopedMemory::new(1024).unwrap();
    let barrier = Arc::new(Barrier::new(3));
    let (tx, rx) = mpsc::channel();

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let area = area.clone();
            let barrier = Arc::clone(&barrier);
            let tx = tx.clone();
            thread::spawn(move || {
                area.enter(|| {
                    tx.send(()).unwrap();
                    barrier.wait();
                })
                .unwrap();
            })
        })
        .collect();

    rx.recv().unwrap();
    rx.recv().unwrap();
    assert_eq!(area.reference_count(), 2);
    assert!(!area.is_reclaimable());
    barrier.wait();
    for handle in handles {
        handle.join().unwrap();
    }
    area.join();
    assert_eq!(area.reference_count(), 0);
    assert_eq!(area.reclaim_count(), 1);
}

#[test]
fn join_returns_immediately_when_unused() {
    let area = ScopedMemory::new(16).unwrap();
    area.join();
    assert!(area.join_timeout(&HighResolutionTime::from_millis(1)).unwrap());
}

#[test]
fn join_timeout_gives_up_while_occupied() {
    let area = ScopedMemory::new(16).unwrap();
    let (entered_tx, entered_rx) = mpsc::channel();
    let (leave_tx, leave_rx) = mpsc::channel::<()>();

    let holder = {
        let area = area.clone();
        thread::spawn(move || {
            area.enter(|| {
                entered_tx.send(()).unwrap();
                leave_rx.recv().unwrap();
            })
            .unwrap();
        })
    };

    entered_rx.recv().unwrap();
    assert!(!area.join_timeout(&HighResolutionTime::from_millis(5)).unwrap());
    leave_tx.send(()).unwrap();
    area.join();
    holder.join().unwrap();
    assert!(area.is_reclaimable());
}

fn hold_for(area: &ScopedMemory, hold: Duration) -> thread::JoinHandle<()> {
    let (entered_tx, entered_rx) = mpsc::channel();
    let holder = {
        let area = area.clone();
        thread::spawn(move || {
            area.enter(|| {
                entered_tx.send(()).unwrap();
                thread::sleep(hold);
            })
            .unwrap();
        })
    };
    entered_rx.recv().unwrap();
    holder
}

#[test]
fn join_timeout_beyond_representable_range_waits() {
    let area = ScopedMemory::new(16).unwrap();
    let holder = hold_for(&area, Duration::from_millis(50));

    let forever = HighResolutionTime::max_relative(&ClockHandle::realtime());
    assert!(area.join_timeout(&forever).unwrap());
    assert_eq!(area.reference_count(), 0);
    holder.join().unwrap();
}

#[test]
fn join_timeout_elapsed_bound_returns_at_once() {
    let area = ScopedMemory::new(16).unwrap();
    let holder = hold_for(&area, Duration::from_millis(50));

    assert!(!area.join_timeout(&HighResolutionTime::from_millis(-1)).unwrap());
    holder.join().unwrap();
}

#[test]
fn join_and_enter_admits_one_waiter_per_release() {
    const WORKERS: usize = 4;
    let area = ScopedMemory::new(256).unwrap();
    let inside = Arc::new(AtomicUsize::new(0));
    let widest = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let area = area.clone();
            let inside = Arc::clone(&inside);
            let widest = Arc::clone(&widest);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                area.join_and_enter(|| {
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    widest.fetch_max(now, Ordering::SeqCst);
                    area.allocate(now).unwrap();
                    thread::sleep(Duration::from_millis(2));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
                .unwrap();
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(widest.load(Ordering::SeqCst), 1);
    assert_eq!(area.reclaim_count(), WORKERS as u64);
}

#[test]
fn join_and_enter_timeout_enters_anyway() {
    let area = ScopedMemory::new(16).unwrap();
    let (entered_tx, entered_rx) = mpsc::channel();
    let (leave_tx, leave_rx) = mpsc::channel::<()>();

    let holder = {
        let area = area.clone();
        thread::spawn(move || {
            area.enter(|| {
                entered_tx.send(()).unwrap();
                leave_rx.recv().unwrap();
            })
            .unwrap();
        })
    };

    entered_rx.recv().unwrap();
    let count = area
        .join_and_enter_timeout(&HighResolutionTime::from_millis(5), || {
            area.reference_count()
        })
        .unwrap();
    assert_eq!(count, 2);

    leave_tx.send(()).unwrap();
    holder.join().unwrap();
    assert!(area.is_reclaimable());
}

#[test]
fn join_and_enter_timeout_beyond_representable_range_waits() {
    let area = ScopedMemory::new(16).unwrap();
    let holder = hold_for(&area, Duration::from_millis(50));

    let forever = HighResolutionTime::max_relative(&ClockHandle::realtime());
    let count = area
        .join_and_enter_timeout(&forever, || area.reference_count())
        .unwrap();
    assert_eq!(count, 1);
    holder.join().unwrap();
}

#[test]
fn portal_round_trip() {
    let area = ScopedMemory::new(64).unwrap();
    area.enter(|| {
        assert!(area.portal::<u32>().unwrap().is_none());
        let object = area.allocate(42u32).unwrap();
        area.set_portal(&object).unwrap();

        let back: AreaRef<u32> = area.portal().unwrap().unwrap();
        assert_eq!(*back.get().unwrap(), 42);
        assert_eq!(area.portal::<String>().unwrap_err(), MemoryError::PortalType);
    })
    .unwrap();

    assert_eq!(
        area.portal::<u32>().unwrap_err(),
        MemoryError::InaccessibleArea(area.id())
    );
    area.enter(|| assert!(area.portal::<u32>().unwrap().is_none()))
        .unwrap();
}

#[test]
fn portal_rejects_inner_objects() {
    let outer = ScopedMemory::new(64).unwrap();
    let inner = ScopedMemory::new(64).unwrap();

    outer
        .enter(|| {
            inner
                .enter(|| {
                    let object = inner.allocate(1u8).unwrap();
                    assert!(matches!(
                        outer.set_portal(&object),
                        Err(MemoryError::IllegalAssignment { .. })
                    ));
                    let shared = MemoryArea::immortal().allocate(2u8).unwrap();
                    outer.set_portal(&shared).unwrap();
                })
                .unwrap();
            outer.clear_portal().unwrap();
            assert!(outer.portal::<u8>().unwrap().is_none());
        })
        .unwrap();
}

#[test]
fn portal_store_checked_against_current_context() {
    let outer = ScopedMemory::new(64).unwrap();
    outer
        .enter(|| {
            MemoryArea::heap()
                .enter(|| {
                    let object = outer.allocate(7u8).unwrap();
                    assert!(matches!(
                        outer.set_portal(&object),
                        Err(MemoryError::IllegalAssignment { .. })
                    ));
                })
                .unwrap();
            assert!(outer.portal::<u8>().unwrap().is_none());
        })
        .unwrap();
}
