// Time source abstraction so retry loops can be tested without real sleeps
use std::time::{Duration, Instant};

/// Source of time for the readiness-wait loops.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Block for the given duration.
    fn sleep(&self, duration: Duration);
}

/// Real wall-clock implementation backed by `std::time` and `thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
