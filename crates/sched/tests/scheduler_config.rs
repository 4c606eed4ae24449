//! Tests for the SchedulerConfig builder.

use std::time::Duration;

use rts_sched::{PriorityParameters, RealtimeThread, ScheduleError, Scheduler, SchedulerConfig};
use rts_time::{ClockHandle, ManualClock};

#[test]
fn scheduler_config_builder() {
    let clock = ManualClock::new("virtual");
    let config = SchedulerConfig::builder()
        .name("TestScheduler")
        .priorities(10, 20)
        .quantum(Duration::from_micros(500))
        .clock(clock.handle())
        .build();

    assert_eq!(config.name, "TestScheduler");
    assert_eq!(config.min_priority, 10);
    assert_eq!(config.max_priority, 20);
    assert_eq!(config.quantum, Duration::from_micros(500));
    assert_eq!(config.clock, clock.handle());
    assert!(config.idle_callback.is_none());
}

#[test]
fn scheduler_config_default() {
    let config = SchedulerConfig::default();

    assert_eq!(config.name, "rts");
    assert_eq!(config.priority_range(), 1..=99);
    assert_eq!(config.quantum, Duration::from_millis(1));
    assert_eq!(config.clock, ClockHandle::realtime());
}

#[test]
fn scheduler_config_orders_priority_bounds() {
    let config = SchedulerConfig::builder().priorities(20, 10).build();
    assert_eq!(config.priority_range(), 10..=20);

    let scheduler = Scheduler::new(config);
    assert!(scheduler.validate_priority(15).is_ok());
    assert!(scheduler.validate_priority(21).is_err());
}

#[test]
fn scheduler_with_custom_range() {
    let scheduler = Scheduler::new(SchedulerConfig::builder().priorities(10, 20).build());

    assert!(scheduler.validate_priority(15).is_ok());
    let err = RealtimeThread::builder("outside")
        .priority(PriorityParameters::new(5))
        .scheduler(&scheduler)
        .build()
        .unwrap_err();
    assert!(matches!(
        err,
        ScheduleError::InvalidPriority { priority: 5, min: 10, max: 20 }
    ));
    assert!(scheduler.is_empty());
}
