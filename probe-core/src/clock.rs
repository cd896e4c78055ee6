//! Slot clock: wall-clock time to slot index and phase.
//!
//! Everything here is a pure function of `now`. No counters are kept, so a
//! node that restarts mid-cycle lands on the right slot at its next tick,
//! and any two nodes whose clocks agree land on the same slot.
//!
//! Timestamps are [`Duration`]s since the UNIX epoch. Arithmetic is done on
//! `u128` nanoseconds.

use std::time::Duration;
use thiserror::Error;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Timing configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimingError {
    /// Probe duration plus guard is zero.
    #[error("slot length must be greater than zero")]
    ZeroSlotLength,

    /// Execution window is zero.
    #[error("execution window must be greater than zero")]
    ZeroWindow,

    /// Execution window is wider than the guard margin.
    #[error("execution window {window:?} exceeds guard margin {guard:?}")]
    WindowExceedsGuard {
        /// Configured window.
        window: Duration,
        /// Configured guard.
        guard: Duration,
    },

    /// Clock skew tolerance leaves no room between consecutive slots.
    #[error("clock skew tolerance {skew:?} too large: twice the skew must be below {margin:?} (guard - window)")]
    SkewExceedsMargin {
        /// Configured skew tolerance.
        skew: Duration,
        /// `guard - window`.
        margin: Duration,
    },

    /// Connectivity timeout cap is zero.
    #[error("connectivity timeout must be greater than zero")]
    ZeroConnectTimeout,
}

/// Slot timing parameters.
///
/// `slot_length = probe_duration + guard`. The execution window is the
/// leading `window` of each slot; tests may only be launched inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotTiming {
    /// Fixed bandwidth probe duration.
    pub probe_duration: Duration,
    /// Guard margin added to every slot for connectivity probe and jitter.
    pub guard: Duration,
    /// Width of the launch window at the start of each slot.
    pub window: Duration,
    /// Maximum tolerated clock disagreement between any node and true time.
    pub max_clock_skew: Duration,
    /// Upper cap on the connectivity probe timeout.
    pub connect_timeout: Duration,
}

impl SlotTiming {
    /// Timing with window and connectivity cap at half the guard, zero skew.
    pub fn new(probe_duration: Duration, guard: Duration) -> Self {
        Self {
            probe_duration,
            guard,
            window: guard / 2,
            max_clock_skew: Duration::ZERO,
            connect_timeout: guard / 2,
        }
    }

    /// Set the launch window width.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Set the clock skew tolerance.
    pub fn with_max_clock_skew(mut self, skew: Duration) -> Self {
        self.max_clock_skew = skew;
        self
    }

    /// Set the connectivity probe timeout cap.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Total slot length.
    pub fn slot_length(&self) -> Duration {
        self.probe_duration + self.guard
    }

    /// Check the timing parameters against each other.
    ///
    /// A test launched at the very end of one node's window ends at most
    /// `window + probe_duration` into the slot, leaving `guard - window`
    /// before the boundary. Two clocks can disagree by twice the skew, so
    /// that doubled skew must fit inside the margin.
    pub fn validate(&self) -> Result<(), TimingError> {
        if self.slot_length().is_zero() {
            return Err(TimingError::ZeroSlotLength);
        }
        if self.window.is_zero() {
            return Err(TimingError::ZeroWindow);
        }
        if self.window > self.guard {
            return Err(TimingError::WindowExceedsGuard {
                window: self.window,
                guard: self.guard,
            });
        }
        let margin = self.guard - self.window;
        if self.max_clock_skew * 2 >= margin {
            return Err(TimingError::SkewExceedsMargin {
                skew: self.max_clock_skew,
                margin,
            });
        }
        if self.connect_timeout.is_zero() {
            return Err(TimingError::ZeroConnectTimeout);
        }
        Ok(())
    }
}

impl Default for SlotTiming {
    fn default() -> Self {
        Self::new(Duration::from_secs(3), Duration::from_millis(500))
            .with_max_clock_skew(Duration::from_millis(50))
            .with_connect_timeout(Duration::from_millis(250))
    }
}

fn from_nanos(nanos: u128) -> Duration {
    Duration::new(
        (nanos / NANOS_PER_SEC) as u64,
        (nanos % NANOS_PER_SEC) as u32,
    )
}

/// Absolute slot number: `floor(now / slot_length)`.
///
/// Returns 0 for a zero slot length.
pub fn slot_epoch(now: Duration, slot_length: Duration) -> u64 {
    let len = slot_length.as_nanos();
    if len == 0 {
        return 0;
    }
    (now.as_nanos() / len) as u64
}

/// Greatest multiple of `slot_length` that is `<= now`.
pub fn slot_boundary(now: Duration, slot_length: Duration) -> Duration {
    from_nanos(slot_epoch(now, slot_length) as u128 * slot_length.as_nanos())
}

/// Slot index within the cycle: `floor(now / slot_length) mod num_slots`.
///
/// Returns `None` when the schedule has no slots.
pub fn slot_index(now: Duration, slot_length: Duration, num_slots: usize) -> Option<usize> {
    if num_slots == 0 {
        return None;
    }
    Some((slot_epoch(now, slot_length) % num_slots as u64) as usize)
}

/// Where `now` falls within the slot cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPosition {
    /// The time this position was computed for.
    pub now: Duration,
    /// Absolute slot number since the epoch.
    pub epoch: u64,
    /// Index into the schedule.
    pub index: usize,
    /// Slot start (boundary).
    pub start: Duration,
    /// End of the launch window.
    pub window_end: Duration,
    /// Slot end (next boundary).
    pub end: Duration,
}

impl SlotPosition {
    /// Elapsed time since the slot boundary.
    pub fn phase(&self) -> Duration {
        self.now.saturating_sub(self.start)
    }

    /// Returns true if `now` is inside `[start, window_end)`.
    pub fn in_window(&self) -> bool {
        self.start <= self.now && self.now < self.window_end
    }

    /// Time left in the launch window (zero once it has closed).
    pub fn remaining_window(&self) -> Duration {
        self.window_end.saturating_sub(self.now)
    }

    /// Time left before the next slot boundary.
    pub fn remaining_slot(&self) -> Duration {
        self.end.saturating_sub(self.now)
    }
}

/// Maps wall-clock time onto a schedule of `num_slots` slots.
#[derive(Debug, Clone, Copy)]
pub struct SlotClock {
    timing: SlotTiming,
    num_slots: usize,
}

impl SlotClock {
    /// Create a slot clock.
    pub fn new(timing: SlotTiming, num_slots: usize) -> Self {
        Self { timing, num_slots }
    }

    /// The timing parameters.
    pub fn timing(&self) -> &SlotTiming {
        &self.timing
    }

    /// Number of slots in the cycle.
    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    /// Full cycle length.
    pub fn cycle_length(&self) -> Duration {
        self.timing.slot_length() * self.num_slots as u32
    }

    /// Position of `now`, or `None` for an empty schedule.
    pub fn position(&self, now: Duration) -> Option<SlotPosition> {
        let len = self.timing.slot_length();
        let index = slot_index(now, len, self.num_slots)?;
        let start = slot_boundary(now, len);
        Some(SlotPosition {
            now,
            epoch: slot_epoch(now, len),
            index,
            start,
            window_end: start + self.timing.window.min(len),
            end: start + len,
        })
    }
}
