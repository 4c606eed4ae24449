use std::sync::Arc;
use std::time::Duration;

use rts_time::{HighResolutionTime, ManualClock};

use crate::config::SchedulerConfig;
use crate::scheduler::Scheduler;

mod control;
mod event;

/// Upper bound for waits on other threads.
pub(super) const IDLE: Duration = Duration::from_secs(5);

pub(super) fn ms(millis: i64) -> HighResolutionTime {
    HighResolutionTime::from_millis(millis)
}

/// Scheduler on a manual clock reading zero.
pub(super) fn manual_scheduler() -> (Arc<ManualClock>, Scheduler) {
    let clock = ManualClock::new("test");
    let config = SchedulerConfig::builder()
        .name("test")
        .clock(clock.handle())
        .build();
    (clock, Scheduler::new(config))
}
