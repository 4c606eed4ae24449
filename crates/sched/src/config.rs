use std::time::Duration;

use rts_time::ClockHandle;

/// Scheduler configuration.
///
/// Fixes the priority range schedulables are validated against, the tick
/// quantum of the background ticker, and the clock every release time is
/// measured on.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub name: String,
    pub min_priority: u8,
    pub max_priority: u8,
    /// Interval between ticks of the background ticker.
    pub quantum: Duration,
    pub clock: ClockHandle,
    /// Called after a tick that left no schedulable executing.
    pub idle_callback: Option<fn()>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: "rts".into(),
            min_priority: 1,
            max_priority: 99,
            quantum: Duration::from_millis(1),
            clock: ClockHandle::realtime(),
            idle_callback: None,
        }
    }
}

impl SchedulerConfig {
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::default()
    }

    pub fn priority_range(&self) -> std::ops::RangeInclusive<u8> {
        self.min_priority..=self.max_priority
    }
}

/// Builder for [`SchedulerConfig`].
#[derive(Debug, Clone, Default)]
pub struct SchedulerConfigBuilder {
    config: SchedulerConfig,
}

impl SchedulerConfigBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Sets the inclusive range of valid priorities. The bounds may be given
    /// in either order.
    pub fn priorities(mut self, min: u8, max: u8) -> Self {
        self.config.min_priority = min;
        self.config.max_priority = max;
        self
    }

    pub fn quantum(mut self, quantum: Duration) -> Self {
        self.config.quantum = quantum;
        self
    }

    /// Sets the clock releases and deadlines are measured on.
    pub fn clock(mut self, clock: ClockHandle) -> Self {
        self.config.clock = clock;
        self
    }

    pub fn idle_callback(mut self, callback: fn()) -> Self {
        self.config.idle_callback = Some(callback);
        self
    }

    pub fn build(mut self) -> SchedulerConfig {
        if self.config.min_priority > self.config.max_priority {
            let config = &mut self.config;
            core::mem::swap(&mut config.min_priority, &mut config.max_priority);
        }
        self.config
    }
}
