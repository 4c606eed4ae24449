use proptest::prelude::*;

use rts_sched::{ArrivalOutcome, ArrivalQueue, QueueOverflowPolicy};

fn policy() -> impl Strategy<Value = QueueOverflowPolicy> {
    prop_oneof![
        Just(QueueOverflowPolicy::Reject),
        Just(QueueOverflowPolicy::Discard),
        Just(QueueOverflowPolicy::Replace),
        Just(QueueOverflowPolicy::Grow),
    ]
}

proptest! {
    #[test]
    fn bounded_policies_never_exceed_capacity(
        capacity in 0usize..8,
        arrivals in 0usize..32,
        policy in policy(),
    ) {
        let mut queue = ArrivalQueue::new(capacity);
        let mut pending = 0usize;
        for at in 0..arrivals as i128 {
            match queue.push(at, policy) {
                Ok(ArrivalOutcome::Queued) | Ok(ArrivalOutcome::Grew) => pending += 1,
                Ok(_) | Err(_) => {}
            }
        }
        prop_assert_eq!(queue.len(), pending);
        if policy == QueueOverflowPolicy::Grow {
            prop_assert_eq!(queue.len(), arrivals);
        } else {
            prop_assert!(queue.len() <= capacity);
            prop_assert_eq!(queue.len(), arrivals.min(capacity));
        }
    }

    #[test]
    fn arrivals_leave_in_order(times in proptest::collection::vec(0i128..1_000, 0..32)) {
        let mut queue = ArrivalQueue::new(0);
        for &at in &times {
            queue.push(at, QueueOverflowPolicy::Grow).unwrap();
        }
        let mut drained = Vec::new();
        while let Some(at) = queue.pop() {
            drained.push(at);
        }
        prop_assert_eq!(drained, times);
    }
}
