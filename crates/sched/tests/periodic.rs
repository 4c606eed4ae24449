//! A periodic thread driven by a manual clock.

use std::time::Duration;

use rts_sched::{ReleaseParameters, RealtimeThread, ReleaseState, Scheduler, SchedulerConfig};
use rts_time::ManualClock;

const IDLE: Duration = Duration::from_secs(5);

#[test]
fn five_periods_five_releases_no_misses() {
    let clock = ManualClock::new("virtual");
    let time = clock.handle();
    let scheduler = Scheduler::new(SchedulerConfig::builder().clock(time.clone()).build());

    let params = ReleaseParameters::periodic(time.millis(10))
        .cost(time.millis(2))
        .deadline(time.millis(10))
        .start(time.at_millis(0))
        .build()
        .unwrap();
    let thread = RealtimeThread::builder("periodic")
        .release(params)
        .scheduler(&scheduler)
        .build()
        .unwrap();

    thread.start().unwrap();
    assert!(thread.wait_until_idle(IDLE));
    for _ in 0..4 {
        clock.advance_millis(10);
        let report = scheduler.tick();
        assert_eq!(report.misses, 0);
        assert!(thread.wait_until_idle(IDLE));
    }

    let counters = thread.counters();
    assert_eq!(counters.released, 5);
    assert_eq!(counters.misses, 0);
    assert_eq!(counters.overruns, 0);

    scheduler.shutdown();
    thread.join().unwrap();
    assert_eq!(thread.state(), ReleaseState::Terminated);
}

#[test]
fn overrunning_periodic_thread_is_reported() {
    let clock = ManualClock::new("virtual");
    let time = clock.handle();
    let scheduler = Scheduler::new(SchedulerConfig::builder().clock(time.clone()).build());

    let params = ReleaseParameters::periodic(time.millis(10))
        .cost(time.millis(2))
        .start(time.at_millis(0))
        .build()
        .unwrap();
    let charge = time.millis(3);
    let thread = RealtimeThread::builder("greedy")
        .release(params)
        .scheduler(&scheduler)
        .logic(move |ctx| loop {
            ctx.charge(&charge).unwrap();
            if ctx.wait_for_next_release().is_err() {
                break;
            }
        })
        .build()
        .unwrap();

    thread.start().unwrap();
    assert!(thread.wait_until_idle(IDLE));
    clock.advance_millis(10);
    scheduler.tick();
    assert!(thread.wait_until_idle(IDLE));

    assert_eq!(thread.counters().overruns, 2);
    scheduler.shutdown();
    thread.join().unwrap();
}
