//! Probe execution abstraction.
//!
//! The runner treats probes as black boxes with a success/failure outcome:
//! - [`Prober::connectivity`] sends a single echo request
//! - [`Prober::bandwidth`] runs a fixed-duration throughput test
//! - [`BandwidthServer::serve_once`] accepts one throughput test
//!
//! Timeouts passed in are advisory for the probe program. The runner also
//! wraps every call in a hard timeout and drops the future when it fires,
//! so implementations must terminate their child process on drop.

mod command;
mod mock;

pub use command::{CommandProber, IperfServer};
pub use mock::{MockProber, ProbeCall};

use async_trait::async_trait;
use probe_core::ProbeResult;
use probe_types::NodeAddr;
use std::time::Duration;

/// Client side of the two-phase probe.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Check that `addr` answers at all.
    async fn connectivity(&self, addr: &NodeAddr, timeout: Duration) -> ProbeResult;

    /// Measure throughput to `addr` for `duration`.
    async fn bandwidth(&self, addr: &NodeAddr, duration: Duration, timeout: Duration) -> ProbeResult;
}

/// Server side of the bandwidth probe.
#[async_trait]
pub trait BandwidthServer: Send + Sync {
    /// Wait for one client, serve it, and return the raw report.
    async fn serve_once(&self) -> ProbeResult;
}
