//! Arrival-time queues.
//!
//! Releases of aperiodic and sporadic schedulables are queued with the time
//! they arrived at. The queue starts with the length given by the release
//! parameters; what happens to an arrival that finds it full is decided by
//! the [`QueueOverflowPolicy`].

use std::collections::VecDeque;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// What to do with an arrival that finds the queue full.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueOverflowPolicy {
    /// Refuse the arrival; the releasing caller gets an error.
    Reject,
    /// Drop the arrival silently.
    Discard,
    /// Overwrite the most recently queued arrival.
    Replace,
    /// Lengthen the queue.
    #[default]
    Grow,
}

/// Result of queueing an arrival.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrivalOutcome {
    Queued,
    /// Queued after lengthening the queue.
    Grew,
    /// Overwrote the newest entry.
    Replaced,
    /// Dropped by the discard policy.
    Discarded,
    /// Dropped by the sporadic minimum-interarrival policy.
    Ignored,
    /// Dropped because the schedulable is descheduled.
    Masked,
}

impl ArrivalOutcome {
    /// Whether the arrival will produce a release.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Queued | Self::Grew | Self::Replaced)
    }
}

/// The queue was full under [`QueueOverflowPolicy::Reject`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull {
    pub capacity: usize,
}

/// Bounded FIFO of arrival times, in nanoseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrivalQueue {
    entries: VecDeque<i128>,
    capacity: usize,
}

impl ArrivalQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current length limit; grows under [`QueueOverflowPolicy::Grow`].
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Changes the length limit. Entries beyond a smaller limit are kept.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    pub fn push(
        &mut self,
        at: i128,
        policy: QueueOverflowPolicy,
    ) -> Result<ArrivalOutcome, QueueFull> {
        if !self.is_full() {
            self.entries.push_back(at);
            return Ok(ArrivalOutcome::Queued);
        }
        match policy {
            QueueOverflowPolicy::Reject => Err(QueueFull {
                capacity: self.capacity,
            }),
            QueueOverflowPolicy::Discard => Ok(ArrivalOutcome::Discarded),
            QueueOverflowPolicy::Replace => match self.entries.back_mut() {
                Some(newest) => {
                    *newest = at;
                    Ok(ArrivalOutcome::Replaced)
                }
                // a zero-length queue has nothing to overwrite
                None => Ok(ArrivalOutcome::Discarded),
            },
            QueueOverflowPolicy::Grow => {
                self.capacity = self.capacity.saturating_mul(2).max(self.entries.len() + 1);
                self.entries.push_back(at);
                Ok(ArrivalOutcome::Grew)
            }
        }
    }

    /// Overwrites the newest entry, if any.
    pub fn replace_newest(&mut self, at: i128) -> bool {
        match self.entries.back_mut() {
            Some(newest) => {
                *newest = at;
                true
            }
            None => false,
        }
    }

    pub fn front(&self) -> Option<i128> {
        self.entries.front().copied()
    }

    pub fn pop(&mut self) -> Option<i128> {
        self.entries.pop_front()
    }

    /// Removes every entry, returning how many there were.
    pub fn drain(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    /// Queued arrival times, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = i128> + '_ {
        self.entries.iter().copied()
    }
}
