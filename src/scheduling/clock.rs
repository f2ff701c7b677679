//! A seam between wall-clock time and the scheduler's core loop, so
//! scheduling properties (rate limiting, backoff, reschedule anchoring)
//! can be tested without actually waiting.

use std::time::Duration;

/// A source of monotonic time and the ability to wait.
pub trait Clock: Send + Sync {
    /// Time elapsed since this clock was created.
    fn now(&self) -> Duration;

    /// Block the calling thread for `d`.
    fn sleep(&self, d: Duration);
}

/// The real wall clock, backed by [`std::time::Instant`] and
/// [`std::thread::sleep`].
pub struct SystemClock {
    start: std::time::Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    /// A clock whose epoch is the moment of construction.
    pub fn new() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn sleep(&self, d: Duration) {
        std::thread::sleep(d);
    }
}

/// A clock for tests: `now()` advances only when `sleep` is called, and
/// advances by exactly the requested amount with no actual waiting.
pub struct VirtualClock {
    elapsed: parking_lot::Mutex<Duration>,
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualClock {
    /// A virtual clock starting at zero.
    pub fn new() -> Self {
        Self {
            elapsed: parking_lot::Mutex::new(Duration::ZERO),
        }
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Duration {
        *self.elapsed.lock()
    }

    fn sleep(&self, d: Duration) {
        *self.elapsed.lock() += d;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_clock_advances_only_on_sleep() {
        let clock = VirtualClock::new();
        assert_eq!(clock.now(), Duration::ZERO);
        clock.sleep(Duration::from_secs(5));
        assert_eq!(clock.now(), Duration::from_secs(5));
    }
}
