use crate::area::MemoryArea;
use crate::error::MemoryError;
use crate::reference::RefSlot;
use crate::scoped::ScopedMemory;

#[test]
fn heap_references_own_their_object() {
    let object = MemoryArea::heap().allocate(String::from("kept")).unwrap();
    let copy = object.clone();
    drop(object);
    assert!(copy.is_live());
    assert_eq!(copy.with(|s| s.len()).unwrap(), 4);
}

#[test]
fn slot_accepts_outward_references() {
    let outer = ScopedMemory::new(64).unwrap();
    let inner = ScopedMemory::new(64).unwrap();

    outer
        .enter(|| {
            let parent_obj = outer.allocate(1u32).unwrap();
            inner
                .enter(|| {
                    let child_obj = inner.allocate(2u32).unwrap();

                    let slot = RefSlot::new_in(&inner);
                    slot.set(&parent_obj).unwrap();
                    assert_eq!(*slot.get().unwrap().get().unwrap(), 1);
                    slot.set(&child_obj).unwrap();

                    let outward = RefSlot::new_in(&outer);
                    assert_eq!(
                        outward.set(&child_obj),
                        Err(MemoryError::IllegalAssignment {
                            holder: outer.id(),
                            target: inner.id(),
                        })
                    );
                    assert!(outward.get().is_none());
                })
                .unwrap();
        })
        .unwrap();
}

#[test]
fn heap_slot_rejects_scoped_objects() {
    let area = ScopedMemory::new(64).unwrap();
    let slot = RefSlot::new_in(&MemoryArea::heap());
    area.enter(|| {
        let object = area.allocate(5u8).unwrap();
        assert!(slot.set(&object).is_err());
        let immortal = MemoryArea::immortal().allocate(6u8).unwrap();
        slot.set(&immortal).unwrap();
    })
    .unwrap();
    slot.clear();
    assert!(slot.get().is_none());
}
