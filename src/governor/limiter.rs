//! Global request pacing
//!
//! One shared "next slot" instant. A caller reserves `max(now, next_slot)` and pushes
//! the slot forward by one interval; it then sleeps until its own slot outside any lock.
//! Concurrent callers therefore get distinct, evenly spaced slots without a dedicated
//! timer task.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct Pacer {
    next_slot: Option<Instant>,
    min_interval: Duration,
    max_interval: Duration,
}

impl Pacer {
    /// Creates a pacer; each gap is drawn uniformly from `[min_interval, max_interval]`
    pub fn new(min_interval: Duration, max_interval: Duration) -> Self {
        Self {
            next_slot: None,
            min_interval,
            max_interval: max_interval.max(min_interval),
        }
    }

    /// Reserves the next free slot and returns it
    pub fn reserve(&mut self, now: Instant) -> Instant {
        let slot = match self.next_slot {
            Some(next) if next > now => next,
            _ => now,
        };
        self.next_slot = Some(slot + self.next_interval());
        slot
    }

    /// Time the caller would have to wait if it reserved at `now`
    pub fn time_until_next_slot(&self, now: Instant) -> Option<Duration> {
        match self.next_slot {
            Some(next) if next > now => Some(next - now),
            _ => None,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    fn next_interval(&self) -> Duration {
        let spread = (self.max_interval - self.min_interval).as_millis() as u64;
        if spread == 0 {
            self.min_interval
        } else {
            self.min_interval + Duration::from_millis(fastrand::u64(0..=spread))
        }
    }
}
