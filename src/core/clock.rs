//! Time source used by every wait loop in the bench.
//!
//! All timeouts, settle delays and warm-up ceilings go through this trait so a
//! run can be replayed against virtual time.
use parking_lot::Mutex;
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    /// Monotonic time since the clock was created.
    fn now(&self) -> Duration;

    fn sleep(&self, duration: Duration);

    /// Wall-clock seconds since the Unix epoch, used for the RTC command.
    fn unix_seconds(&self) -> i64;
}

/// Real time.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn unix_seconds(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Virtual time: `sleep` returns immediately and advances `now`.
#[derive(Debug)]
pub struct ManualClock {
    elapsed: Mutex<Duration>,
    epoch_seconds: i64,
}

impl ManualClock {
    pub fn new(epoch_seconds: i64) -> Self {
        Self {
            elapsed: Mutex::new(Duration::ZERO),
            epoch_seconds,
        }
    }

    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock() += duration;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(1_757_338_736)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.elapsed.lock()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }

    fn unix_seconds(&self) -> i64 {
        self.epoch_seconds + self.now().as_secs() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_on_sleep() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now(), Duration::ZERO);

        clock.sleep(Duration::from_millis(1500));
        assert_eq!(clock.now(), Duration::from_millis(1500));
        assert_eq!(clock.unix_seconds(), 1_001);
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let first = clock.now();
        clock.sleep(Duration::from_millis(2));
        assert!(clock.now() > first);
    }
}
