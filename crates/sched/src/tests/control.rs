use std::sync::Arc;
use std::thread;

use rts_time::ManualClock;

use super::{manual_scheduler, ms, IDLE};
use crate::control::{ReleaseControl, ReleaseState, WakeReason};
use crate::error::ScheduleError;
use crate::handler::AsyncEventHandler;
use crate::queue::{ArrivalOutcome, QueueOverflowPolicy};
use crate::release::{MitViolationPolicy, ReleaseParameters};

fn started(clock: &Arc<ManualClock>, params: ReleaseParameters) -> Arc<ReleaseControl> {
    let control = ReleaseControl::new("control".into(), params, clock.handle());
    control.start().unwrap();
    control
}

fn now_ns(clock: &Arc<ManualClock>) -> i128 {
    clock.handle().now().as_nanos()
}

#[test]
fn lifecycle_states() {
    let (clock, _scheduler) = manual_scheduler();
    let params = ReleaseParameters::aperiodic().build().unwrap();
    let control = ReleaseControl::new("life".into(), params, clock.handle());
    assert_eq!(control.state(), ReleaseState::NotStarted);
    assert!(matches!(
        control.release(),
        Err(ScheduleError::InvalidState { op: "release", .. })
    ));

    control.start().unwrap();
    assert!(matches!(control.start(), Err(ScheduleError::AlreadyStarted(_))));
    assert_eq!(control.state(), ReleaseState::WaitingForRelease);

    assert_eq!(control.release().unwrap(), ArrivalOutcome::Grew);
    let next = control.wait_for_next_release().unwrap();
    assert_eq!(next.wake, WakeReason::Released);
    assert!(!next.deadline_missed);
    assert_eq!(control.state(), ReleaseState::Executing);

    control.terminate();
    assert_eq!(control.state(), ReleaseState::Terminated);
    assert!(matches!(control.release(), Err(ScheduleError::Terminated(_))));
    assert!(matches!(
        control.wait_for_next_release(),
        Err(ScheduleError::Terminated(_))
    ));
}

#[test]
fn periodic_parameters_refuse_explicit_release() {
    let (clock, _scheduler) = manual_scheduler();
    let control = started(&clock, ReleaseParameters::periodic(ms(10)).build().unwrap());
    assert!(matches!(
        control.release(),
        Err(ScheduleError::InvalidState { op: "release", .. })
    ));
}

#[test]
fn overrun_fires_once_per_release() {
    let (clock, _scheduler) = manual_scheduler();
    let overrun = AsyncEventHandler::builder("overrun").build(|_| {}).unwrap();
    let params = ReleaseParameters::aperiodic()
        .cost(ms(2))
        .overrun_handler(overrun.clone())
        .build()
        .unwrap();
    let control = started(&clock, params);

    control.release().unwrap();
    control.wait_for_next_release().unwrap();
    control.charge(&ms(1)).unwrap();
    assert_eq!(control.counters().overruns, 0);
    control.charge(&ms(2)).unwrap();
    assert_eq!(control.counters().overruns, 1);
    control.charge(&ms(5)).unwrap();
    assert_eq!(control.counters().overruns, 1);

    control.release().unwrap();
    control.wait_for_next_release().unwrap();
    assert_eq!(control.consumed(), Some(clock.handle().millis(0)));
    control.charge(&ms(3)).unwrap();
    assert_eq!(control.counters().overruns, 2);

    assert!(overrun.wait_until_idle(IDLE));
    assert_eq!(overrun.handled_count(), 2);
}

#[test]
fn spending_exactly_the_budget_is_not_an_overrun() {
    let (clock, _scheduler) = manual_scheduler();
    let params = ReleaseParameters::aperiodic().cost(ms(2)).build().unwrap();
    let control = started(&clock, params);

    control.release().unwrap();
    control.wait_for_next_release().unwrap();
    control.charge(&ms(2)).unwrap();
    assert_eq!(control.counters().overruns, 0);
    control.charge(&clock.handle().relative(0, 1).unwrap()).unwrap();
    assert_eq!(control.counters().overruns, 1);
}

#[test]
fn zero_cost_is_not_enforced() {
    let (clock, _scheduler) = manual_scheduler();
    let control = started(&clock, ReleaseParameters::aperiodic().build().unwrap());
    control.release().unwrap();
    control.wait_for_next_release().unwrap();
    control.charge(&ms(1_000)).unwrap();
    assert_eq!(control.counters().overruns, 0);
}

#[test]
fn charge_requires_a_running_release() {
    let (clock, _scheduler) = manual_scheduler();
    let control = started(&clock, ReleaseParameters::aperiodic().build().unwrap());
    assert!(matches!(
        control.charge(&ms(1)),
        Err(ScheduleError::InvalidState { op: "charge", .. })
    ));
    control.release().unwrap();
    control.wait_for_next_release().unwrap();
    assert!(matches!(
        control.charge(&clock.handle().at_millis(1)),
        Err(ScheduleError::InvalidParameter { name: "charge", .. })
    ));
}

#[test]
fn tick_charges_elapsed_time() {
    let (clock, _scheduler) = manual_scheduler();
    let params = ReleaseParameters::aperiodic().cost(ms(3)).build().unwrap();
    let control = started(&clock, params);
    control.release().unwrap();
    control.wait_for_next_release().unwrap();

    clock.advance_millis(2);
    let outcome = control.on_tick(now_ns(&clock));
    assert!(outcome.executing);
    assert!(!outcome.overrun);
    clock.advance_millis(2);
    assert!(control.on_tick(now_ns(&clock)).overrun);
    clock.advance_millis(2);
    assert!(!control.on_tick(now_ns(&clock)).overrun);
    assert_eq!(control.counters().overruns, 1);
}

#[test]
fn deadline_miss_is_detected_once() {
    let (clock, _scheduler) = manual_scheduler();
    let miss = AsyncEventHandler::builder("miss").build(|_| {}).unwrap();
    let params = ReleaseParameters::aperiodic()
        .deadline(ms(5))
        .miss_handler(miss.clone())
        .build()
        .unwrap();
    let control = started(&clock, params);
    control.release().unwrap();
    control.wait_for_next_release().unwrap();

    clock.advance_millis(4);
    assert!(!control.on_tick(now_ns(&clock)).missed);
    clock.advance_millis(1);
    assert!(control.on_tick(now_ns(&clock)).missed);
    assert_eq!(control.state(), ReleaseState::DeadlineMiss);
    clock.advance_millis(1);
    assert!(!control.on_tick(now_ns(&clock)).missed);
    assert_eq!(control.counters().misses, 1);

    control.release().unwrap();
    let next = control.wait_for_next_release().unwrap();
    assert!(next.deadline_missed);
    assert_eq!(control.state(), ReleaseState::Executing);

    assert!(miss.wait_until_idle(IDLE));
    assert_eq!(miss.handled_count(), 1);
}

#[test]
fn late_completion_counts_as_miss() {
    let (clock, _scheduler) = manual_scheduler();
    let params = ReleaseParameters::aperiodic().deadline(ms(5)).build().unwrap();
    let control = started(&clock, params);
    control.release().unwrap();
    control.wait_for_next_release().unwrap();

    clock.advance_millis(6);
    control.release().unwrap();
    assert!(control.wait_for_next_release().unwrap().deadline_missed);
    assert_eq!(control.counters().misses, 1);
    assert_eq!(control.counters().completed, 1);
}

#[test]
fn descheduling_masks_releases_and_enforcement() {
    let (clock, _scheduler) = manual_scheduler();
    let params = ReleaseParameters::aperiodic()
        .cost(ms(1))
        .deadline(ms(2))
        .build()
        .unwrap();
    let control = started(&clock, params);
    control.release().unwrap();
    control.wait_for_next_release().unwrap();

    control.deschedule();
    assert!(control.is_descheduled());
    assert_eq!(control.release().unwrap(), ArrivalOutcome::Masked);
    assert_eq!(control.pending_releases(), 0);
    clock.advance_millis(3);
    let outcome = control.on_tick(now_ns(&clock));
    assert!(!outcome.overrun && !outcome.missed);

    control.reschedule();
    clock.advance_millis(1);
    let outcome = control.on_tick(now_ns(&clock));
    assert!(outcome.overrun);
    assert!(outcome.missed);
    assert_eq!(control.counters().masked, 1);
}

#[test]
fn periodic_releases_follow_the_clock() {
    let (clock, _scheduler) = manual_scheduler();
    let params = ReleaseParameters::periodic(ms(10))
        .start(clock.handle().at_millis(0))
        .build()
        .unwrap();
    let control = started(&clock, params);

    assert_eq!(control.on_tick(now_ns(&clock)).released, 1);
    control.deschedule();
    clock.advance_millis(10);
    assert_eq!(control.on_tick(now_ns(&clock)).released, 0);
    control.reschedule();
    clock.advance_millis(10);
    assert_eq!(control.on_tick(now_ns(&clock)).released, 1);
    assert_eq!(control.pending_releases(), 2);
    assert_eq!(control.counters().masked, 1);

    let first = control.wait_for_next_release().unwrap();
    assert_eq!(first.release_time.as_nanos(), 0);
    let second = control.wait_for_next_release().unwrap();
    assert_eq!(second.release_time.as_nanos(), 20_000_000);
}

#[test]
fn reject_policy_reports_overflow() {
    let (clock, _scheduler) = manual_scheduler();
    let params = ReleaseParameters::aperiodic()
        .initial_queue_length(2)
        .overflow_policy(QueueOverflowPolicy::Reject)
        .build()
        .unwrap();
    let control = started(&clock, params.clone());

    assert_eq!(control.release().unwrap(), ArrivalOutcome::Queued);
    assert_eq!(control.release().unwrap(), ArrivalOutcome::Queued);
    assert!(matches!(
        control.release(),
        Err(ScheduleError::QueueOverflow { capacity: 2, .. })
    ));
    assert_eq!(control.pending_releases(), 2);

    params.set_initial_queue_length(3).unwrap();
    assert_eq!(control.release().unwrap(), ArrivalOutcome::Queued);
    assert_eq!(control.pending_releases(), 3);
    assert_eq!(control.take_pending_releases(), 3);
}

#[test]
fn discard_policy_counts_drops() {
    let (clock, _scheduler) = manual_scheduler();
    let params = ReleaseParameters::aperiodic()
        .initial_queue_length(1)
        .overflow_policy(QueueOverflowPolicy::Discard)
        .build()
        .unwrap();
    let control = started(&clock, params);
    control.release().unwrap();
    assert_eq!(control.release().unwrap(), ArrivalOutcome::Discarded);
    assert_eq!(control.counters().dropped, 1);
    assert_eq!(control.pending_releases(), 1);
}

fn sporadic(clock: &Arc<ManualClock>, policy: MitViolationPolicy) -> Arc<ReleaseControl> {
    let params = ReleaseParameters::sporadic(ms(10))
        .mit_violation_policy(policy)
        .build()
        .unwrap();
    started(clock, params)
}

#[test]
fn mit_except_refuses_early_release() {
    let (clock, _scheduler) = manual_scheduler();
    let control = sporadic(&clock, MitViolationPolicy::Except);
    control.release().unwrap();
    clock.advance_millis(5);
    assert!(matches!(
        control.release(),
        Err(ScheduleError::MitViolation { .. })
    ));
    clock.advance_millis(5);
    assert!(control.release().unwrap().is_pending());
}

#[test]
fn mit_ignore_and_replace() {
    let (clock, _scheduler) = manual_scheduler();
    let ignore = sporadic(&clock, MitViolationPolicy::Ignore);
    ignore.release().unwrap();
    assert_eq!(ignore.release().unwrap(), ArrivalOutcome::Ignored);
    assert_eq!(ignore.pending_releases(), 1);
    assert_eq!(ignore.counters().dropped, 1);

    let replace = sporadic(&clock, MitViolationPolicy::Replace);
    replace.release().unwrap();
    clock.advance_millis(3);
    assert_eq!(replace.release().unwrap(), ArrivalOutcome::Replaced);
    assert_eq!(replace.pending_releases(), 1);
    let next = replace.wait_for_next_release().unwrap();
    assert_eq!(next.release_time.as_nanos(), 3_000_000);
}

#[test]
fn mit_save_defers_the_release() {
    let (clock, _scheduler) = manual_scheduler();
    let control = sporadic(&clock, MitViolationPolicy::Save);
    control.release().unwrap();
    clock.advance_millis(3);
    assert!(control.release().unwrap().is_pending());
    assert_eq!(control.pending_releases(), 2);

    assert_eq!(control.wait_for_next_release().unwrap().release_time.as_nanos(), 0);
    clock.advance_millis(7);
    let deferred = control.wait_for_next_release().unwrap();
    assert_eq!(deferred.release_time.as_nanos(), 10_000_000);
}

#[test]
fn interrupt_wakes_a_blocked_schedulable() {
    let (clock, _scheduler) = manual_scheduler();
    let control = started(&clock, ReleaseParameters::aperiodic().build().unwrap());

    let waiter = {
        let control = control.clone();
        thread::spawn(move || control.wait_for_next_release())
    };
    assert!(control.wait_until_idle(IDLE));
    control.interrupt();

    let next = waiter.join().unwrap().unwrap();
    assert_eq!(next.wake, WakeReason::Interrupted);
    assert_eq!(control.counters().interrupts, 1);
    assert_eq!(control.state(), ReleaseState::Executing);
}

#[test]
fn interrupt_of_running_schedulable() {
    let (clock, _scheduler) = manual_scheduler();
    let params = ReleaseParameters::aperiodic().build().unwrap();
    let control = started(&clock, params.clone());
    control.release().unwrap();
    control.wait_for_next_release().unwrap();

    control.interrupt();
    assert!(control.is_interrupted());
    assert!(control.clear_interrupted());
    assert!(!control.is_interrupted());

    params.set_rousable(true).unwrap();
    control.interrupt();
    let next = control.wait_for_next_release().unwrap();
    assert_eq!(next.wake, WakeReason::Interrupted);
    assert!(!control.is_interrupted());
}

#[test]
fn terminate_unblocks_a_waiter() {
    let (clock, _scheduler) = manual_scheduler();
    let control = started(&clock, ReleaseParameters::aperiodic().build().unwrap());
    let waiter = {
        let control = control.clone();
        thread::spawn(move || control.wait_for_next_release())
    };
    assert!(control.wait_until_idle(IDLE));
    control.terminate();
    assert!(matches!(
        waiter.join().unwrap(),
        Err(ScheduleError::Terminated(_))
    ));
}
