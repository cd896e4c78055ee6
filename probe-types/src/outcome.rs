//! Published per-attempt test records.

use crate::NodeAddr;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of an edge produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Client side; launched the probe.
    Initiator,
    /// Server side; accepted the probe.
    Responder,
}

/// Which probe phase a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    /// Single echo request (ping).
    Connectivity,
    /// Fixed-duration throughput test (iperf3).
    Bandwidth,
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connectivity => f.write_str("connectivity"),
            Self::Bandwidth => f.write_str("bandwidth"),
        }
    }
}

/// Outcome of one probe attempt, emitted once and then discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    /// The partner node the probe targeted (or, for responders, the client).
    pub address: NodeAddr,
    /// Side of the edge that produced this record.
    pub role: Role,
    /// Probe phase.
    pub kind: ProbeKind,
    /// Whether the attempt succeeded.
    pub success: bool,
    /// Parsed throughput in bits per second, bandwidth probes only.
    #[serde(default)]
    pub throughput_bps: Option<f64>,
    /// Raw diagnostic payload (probe output or error description).
    pub raw: String,
    /// Schedule slot index the attempt ran in, if known.
    #[serde(default)]
    pub slot: Option<usize>,
    /// Wall-clock time the record was produced (ms since UNIX epoch).
    pub timestamp_ms: u64,
}

impl TestOutcome {
    /// Throughput in Mbps, if a figure was parsed.
    pub fn throughput_mbps(&self) -> Option<f64> {
        self.throughput_bps.map(|bps| bps / 1_000_000.0)
    }
}
