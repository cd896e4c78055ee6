//! Wall-clock abstraction.
//!
//! The agent never calls `SystemTime::now()` directly; it asks a [`Clock`].
//! Tests drive slot boundaries deterministically with [`MockClock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of wall-clock time as a [`Duration`] since the UNIX epoch.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current wall-clock time.
    fn now(&self) -> Duration;

    /// Current wall-clock time in milliseconds.
    fn now_ms(&self) -> u64 {
        self.now().as_millis() as u64
    }
}

/// The system clock. Assumed to be kept in sync by an external service.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        // A clock set before 1970 reads as the epoch.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
    }
}

/// Settable clock for tests. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct MockClock {
    nanos: Arc<AtomicU64>,
}

impl MockClock {
    /// Create a mock clock reading `now`.
    pub fn new(now: Duration) -> Self {
        let clock = Self::default();
        clock.set(now);
        clock
    }

    /// Set the current time.
    pub fn set(&self, now: Duration) {
        self.nanos.store(now.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now() > Duration::from_secs(1_577_836_800));
    }

    #[test]
    fn mock_clock_set_and_advance() {
        let clock = MockClock::new(Duration::from_millis(3500));
        let shared = clock.clone();
        shared.advance(Duration::from_millis(250));
        assert_eq!(clock.now(), Duration::from_millis(3750));
        assert_eq!(clock.now_ms(), 3750);

        clock.set(Duration::from_secs(10));
        assert_eq!(shared.now(), Duration::from_secs(10));
    }
}
