//! Per-slot state machine for mesh-probe.
//!
//! This module provides a pure, side-effect-free state machine that decides,
//! on every tick, whether this node should launch a test. It takes events
//! as input and produces a list of actions to execute.
//!
//! The actual I/O (running probes, publishing outcomes) is performed by the
//! agent, not by this module.
//!
//! ```text
//! IDLE ──tick──► AWAIT_WINDOW ──in window, partner, reachable──► ARMED
//!   ▲                │                                             │
//!   │                └──no partner / unreachable / too late──► IDLE│
//!   │                                                        Launched
//!   └───────────────────────Completed──────────── RUNNING ◄───────┘
//! ```
//!
//! A window that opens while a run is still in flight is skipped as
//! [`SkipReason::Busy`].

use crate::clock::{SlotPosition, SlotTiming};
use probe_types::NodeAddr;
use std::time::Duration;

/// Slack kept between the connectivity timeout and the end of the window.
const WINDOW_SLACK: Duration = Duration::from_millis(1);

/// Machine state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    /// Nothing decided yet.
    Idle,
    /// Outside the launch window, or this slot was already decided.
    AwaitWindow,
    /// Launch requested, not yet confirmed.
    Armed {
        /// Absolute slot number.
        epoch: u64,
        /// Test partner.
        partner: NodeAddr,
    },
    /// Probes in flight.
    Running {
        /// Absolute slot number.
        epoch: u64,
        /// Test partner.
        partner: NodeAddr,
    },
}

/// Everything the machine needs to know about the current tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickInput {
    /// Slot position of `now`.
    pub position: SlotPosition,
    /// This node's partner in the current slot, if it initiates.
    pub partner: Option<NodeAddr>,
    /// Whether `partner` is in the reachable set.
    pub partner_reachable: bool,
}

/// Events fed into the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Periodic tick.
    Tick(TickInput),
    /// The agent started the probes for the armed plan.
    Launched,
    /// The probes finished (success, failure, or timeout).
    Completed,
}

/// Why a slot was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// This node initiates nothing in the slot.
    NotScheduled,
    /// The partner is not in the reachable set.
    Unreachable,
    /// Too little of the window remains to fit a connectivity probe.
    WindowClosed,
    /// The previous slot's run had not finished when this window opened.
    Busy,
}

/// Everything needed to run one slot's probes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    /// Absolute slot number.
    pub epoch: u64,
    /// Schedule slot index.
    pub index: usize,
    /// Test partner.
    pub partner: NodeAddr,
    /// Connectivity probe timeout, strictly inside the remaining window.
    pub connect_timeout: Duration,
    /// End of the launch window.
    pub window_end: Duration,
    /// Next slot boundary; all work must be done by then.
    pub slot_end: Duration,
}

/// Actions for the agent to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Nothing to do until the next slot starts.
    Wait {
        /// Next slot boundary.
        next_slot_at: Duration,
    },
    /// This slot is skipped; no retry.
    Skip {
        /// Absolute slot number.
        epoch: u64,
        /// Schedule slot index.
        index: usize,
        /// Why.
        reason: SkipReason,
    },
    /// Run the probes.
    Launch(LaunchPlan),
}

/// Slot state machine - NO I/O, just state transitions.
///
/// Each absolute slot is decided at most once, so extra ticks inside the
/// same window never launch a second test.
#[derive(Debug, Clone)]
pub struct SlotMachine {
    state: SlotState,
    last_decided: Option<u64>,
}

impl SlotMachine {
    /// Create a new machine in the Idle state.
    pub fn new() -> Self {
        Self {
            state: SlotState::Idle,
            last_decided: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> &SlotState {
        &self.state
    }

    /// Returns true while a launch is armed or running.
    pub fn is_busy(&self) -> bool {
        matches!(self.state, SlotState::Armed { .. } | SlotState::Running { .. })
    }

    /// Process an event and return the actions to execute.
    pub fn on_event(&mut self, event: Event, timing: &SlotTiming) -> Vec<Action> {
        match event {
            Event::Tick(input) => {
                if self.is_busy() {
                    return self.on_busy_tick(input);
                }
                self.on_tick(input, timing)
            }
            Event::Launched => {
                if let SlotState::Armed { epoch, partner } = &self.state {
                    self.state = SlotState::Running {
                        epoch: *epoch,
                        partner: partner.clone(),
                    };
                }
                vec![]
            }
            Event::Completed => {
                if self.is_busy() {
                    self.state = SlotState::Idle;
                }
                vec![]
            }
        }
    }

    /// A new slot's window opened while a run is still in flight.
    fn on_busy_tick(&mut self, input: TickInput) -> Vec<Action> {
        let position = input.position;
        if !position.in_window() || self.last_decided == Some(position.epoch) {
            return vec![];
        }
        self.last_decided = Some(position.epoch);

        let reason = match input.partner {
            Some(_) => SkipReason::Busy,
            None => SkipReason::NotScheduled,
        };
        vec![Action::Skip {
            epoch: position.epoch,
            index: position.index,
            reason,
        }]
    }

    fn on_tick(&mut self, input: TickInput, timing: &SlotTiming) -> Vec<Action> {
        let position = input.position;
        let wait = Action::Wait {
            next_slot_at: position.end,
        };

        if !position.in_window() || self.last_decided == Some(position.epoch) {
            self.state = SlotState::AwaitWindow;
            return vec![wait];
        }
        self.last_decided = Some(position.epoch);

        let skip = |reason| Action::Skip {
            epoch: position.epoch,
            index: position.index,
            reason,
        };

        let Some(partner) = input.partner else {
            self.state = SlotState::Idle;
            return vec![skip(SkipReason::NotScheduled)];
        };

        if !input.partner_reachable {
            self.state = SlotState::Idle;
            return vec![skip(SkipReason::Unreachable)];
        }

        let connect_timeout = timing
            .connect_timeout
            .min(position.remaining_window().saturating_sub(WINDOW_SLACK));
        if connect_timeout.is_zero() {
            self.state = SlotState::Idle;
            return vec![skip(SkipReason::WindowClosed)];
        }

        self.state = SlotState::Armed {
            epoch: position.epoch,
            partner: partner.clone(),
        };
        vec![Action::Launch(LaunchPlan {
            epoch: position.epoch,
            index: position.index,
            partner,
            connect_timeout,
            window_end: position.window_end,
            slot_end: position.end,
        })]
    }
}

impl Default for SlotMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Bandwidth probe timeout for a launch at `now`.
///
/// Capped at `probe_duration + guard / 2` and at the time left before the
/// slot boundary. Returns `None` once the boundary has passed.
pub fn bandwidth_timeout(now: Duration, plan: &LaunchPlan, timing: &SlotTiming) -> Option<Duration> {
    if now >= plan.slot_end {
        return None;
    }
    let cap = timing.probe_duration + timing.guard / 2;
    Some(cap.min(plan.slot_end - now))
}
