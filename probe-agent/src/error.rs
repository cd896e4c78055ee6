//! Error types for probe-agent.
//!
//! [`AgentError`] carries only the fatal classes: bad configuration and
//! broken schedule invariants. Probe, feed, and sink failures have their
//! own enums and are absorbed where they happen.

use probe_core::{RoleError, ScheduleError, TimingError};
use std::time::Duration;

/// Main error type for agent operations. Every variant stops the process.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Timing parameters are inconsistent.
    #[error("timing error: {0}")]
    Timing(#[from] TimingError),

    /// Schedule failed its invariant check.
    #[error("schedule invariant violated: {0}")]
    Schedule(#[from] ScheduleError),

    /// Role lookup found a corrupted slot.
    #[error("schedule corrupted: {0}")]
    Role(#[from] RoleError),
}

/// Reachability feed errors. Logged; the previous reachable set is kept.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// Reading the feed source failed.
    #[error("feed I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Feed command exited unsuccessfully.
    #[error("feed command failed: exit={exit_code:?}, stderr={stderr}")]
    CommandFailed {
        /// Exit code, `None` if killed by a signal.
        exit_code: Option<i32>,
        /// Standard error output.
        stderr: String,
    },

    /// Feed command did not finish in time.
    #[error("feed command timed out after {0:?}")]
    Timeout(Duration),

    /// Feed output could not be decoded.
    #[error("invalid feed payload: {0}")]
    Parse(String),
}

/// Outcome sink errors. Logged; the outcome is dropped.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Writing the record failed.
    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding the record failed.
    #[error("sink encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    /// The receiving side has gone away.
    #[error("sink closed")]
    Closed,
}

/// Result type alias for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Result type alias for feed operations.
pub type FeedResult<T> = std::result::Result<T, FeedError>;

/// Result type alias for sink operations.
pub type SinkResult<T> = std::result::Result<T, SinkError>;
