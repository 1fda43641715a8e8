//! Monotonic time sources
//!
//! The scheduler reads time only through [`Clock`], which lets tests swap the
//! host clock for [`ManualClock`] and run timer-heavy programs instantly.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Monotonic time source used to compute and await wake times
pub trait Clock {
    /// Current instant
    fn now(&self) -> Instant;

    /// Block the loop until `deadline` has passed.
    ///
    /// Implementations must never return before `now() >= deadline`.
    fn park_until(&self, deadline: Instant);
}

/// Host monotonic clock; parking sleeps the thread
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn park_until(&self, deadline: Instant) {
        // thread::sleep may wake spuriously early on some platforms
        loop {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            std::thread::sleep(deadline - now);
        }
    }
}

/// Virtual clock that only moves when parked or advanced explicitly
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
}

impl ManualClock {
    /// Create a clock frozen at the current host instant
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    /// Move time forward by `by`
    pub fn advance(&self, by: Duration) {
        *self.elapsed.lock() += by;
    }

    /// Virtual time elapsed since creation
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.elapsed.lock()
    }

    fn park_until(&self, deadline: Instant) {
        let target = deadline.saturating_duration_since(self.origin);
        let mut elapsed = self.elapsed.lock();
        if target > *elapsed {
            *elapsed = target;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_park_never_early() {
        let clock = SystemClock;
        let deadline = clock.now() + Duration::from_millis(5);
        clock.park_until(deadline);
        assert!(clock.now() >= deadline);
    }

    #[test]
    fn test_manual_clock_jumps_on_park() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.park_until(start + Duration::from_secs(5));
        assert_eq!(clock.now() - start, Duration::from_secs(5));
    }

    #[test]
    fn test_manual_clock_never_goes_backwards() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.advance(Duration::from_secs(2));
        clock.park_until(start + Duration::from_secs(1));
        assert_eq!(clock.elapsed(), Duration::from_secs(2));
    }
}
