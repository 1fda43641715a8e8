//! Timer wheel for sleeping tasks
//!
//! A min-heap of wake times. Entries with the same wake time fire in the
//! order they were registered.

use crate::scheduler::TaskId;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::task::Waker;
use std::time::Instant;

/// Entry in the timer heap
struct SleepEntry {
    /// When to wake this task
    wake_at: Instant,
    /// Registration order, breaks ties between equal wake times
    seq: u64,
    /// Task that registered the timer (for logging)
    task_id: Option<TaskId>,
    /// Waker to fire
    waker: Waker,
}

impl SleepEntry {
    fn key(&self) -> (Instant, u64) {
        (self.wake_at, self.seq)
    }
}

// Reverse ordering for min-heap (earliest wake time first)
impl Ord for SleepEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

impl PartialOrd for SleepEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SleepEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for SleepEntry {}

/// Ordered collection of pending wake times
#[derive(Default)]
pub(crate) struct TimerWheel {
    sleeping: BinaryHeap<SleepEntry>,
    next_seq: u64,
}

impl TimerWheel {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register `waker` to fire once `wake_at` has passed. Returns the entry's
    /// key for [`cancel`](Self::cancel).
    pub(crate) fn register(
        &mut self,
        wake_at: Instant,
        task_id: Option<TaskId>,
        waker: Waker,
    ) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.sleeping.push(SleepEntry {
            wake_at,
            seq,
            task_id,
            waker,
        });
        seq
    }

    /// Drop a pending entry. Returns false if it already fired or was cleared.
    pub(crate) fn cancel(&mut self, seq: u64) -> bool {
        let before = self.sleeping.len();
        self.sleeping.retain(|entry| entry.seq != seq);
        self.sleeping.len() != before
    }

    /// Earliest pending wake time
    pub(crate) fn next_wake(&self) -> Option<Instant> {
        self.sleeping.peek().map(|entry| entry.wake_at)
    }

    /// Remove every entry due at `now`, earliest first. The caller fires the
    /// returned wakers after releasing its borrow of the wheel.
    pub(crate) fn take_expired(&mut self, now: Instant) -> Vec<(Option<TaskId>, Waker)> {
        let mut expired = Vec::new();
        while let Some(entry) = self.sleeping.peek() {
            if entry.wake_at > now {
                break;
            }
            if let Some(entry) = self.sleeping.pop() {
                expired.push((entry.task_id, entry.waker));
            }
        }
        expired
    }

    /// Get the number of pending timers
    pub(crate) fn len(&self) -> usize {
        self.sleeping.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.sleeping.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.sleeping.clear();
    }
}
