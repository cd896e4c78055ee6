//! # probe-core
//!
//! Pure logic for mesh-probe (no I/O, instant tests).
//!
//! This crate implements the scheduling algorithm, the slot clock, and the
//! per-slot state machine without any network, process, or disk I/O.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. Two nodes that feed the same configuration and the
//! same wall-clock time into these functions get the same answer, which is
//! the whole coordination mechanism: nobody talks to anybody.
//!
//! The actual I/O (probes, reachability feed, publishing) is performed by
//! `probe-agent`, which interprets the actions produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod classify;
pub mod clock;
pub mod role;
pub mod schedule;
pub mod state;

pub use classify::{
    classify_bandwidth, classify_connectivity, parse_server_report, parse_throughput, INVALID_BANDWIDTH_JSON,
    OutcomeContext, ProbeError, ProbeResult, ServerReport, ThroughputError,
};
pub use clock::{slot_boundary, slot_epoch, slot_index, SlotClock, SlotPosition, SlotTiming, TimingError};
pub use role::{expected_initiator, resolve_role, RoleError};
pub use schedule::{build_schedule, candidate_edges, Schedule, ScheduleError, Slot};
pub use state::{bandwidth_timeout, Action, Event, LaunchPlan, SkipReason, SlotMachine, SlotState, TickInput};
