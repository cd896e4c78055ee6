//! Responder loop: keep a one-off bandwidth server listening.
//!
//! Initiators decide when tests happen; this side only has to be ready.
//! Each finished server run is reported as a responder outcome.

use crate::clock::Clock;
use crate::probe::BandwidthServer;
use crate::publish::OutcomeSink;
use probe_core::parse_server_report;
use probe_types::{ProbeKind, Role, TestOutcome};
use std::sync::Arc;
use std::time::Duration;

/// Pause before restarting a server that failed.
const RESTART_BACKOFF: Duration = Duration::from_secs(1);

/// Build a responder outcome from server output.
///
/// Returns `None` if the output names no client.
pub fn handle_server_output(raw: &str, timestamp_ms: u64) -> Option<TestOutcome> {
    let report = parse_server_report(raw)?;
    Some(TestOutcome {
        address: report.client,
        role: Role::Responder,
        kind: ProbeKind::Bandwidth,
        success: report.throughput_bps.is_some(),
        throughput_bps: report.throughput_bps,
        raw: raw.to_string(),
        slot: None,
        timestamp_ms,
    })
}

/// Spawn the responder loop.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_responder(
    server: Arc<dyn BandwidthServer>,
    sink: Arc<dyn OutcomeSink>,
    clock: Arc<dyn Clock>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("Bandwidth responder started");

        loop {
            let raw = match server.serve_once().await {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!("Bandwidth server failed, restarting: {}", e);
                    tokio::time::sleep(RESTART_BACKOFF).await;
                    continue;
                }
            };

            let Some(outcome) = handle_server_output(&raw, clock.now_ms()) else {
                tracing::warn!("Bandwidth server output has no client report");
                continue;
            };

            match outcome.throughput_mbps() {
                Some(mbps) => tracing::info!("Served bandwidth test for {}: {:.2} Mbps", outcome.address, mbps),
                None => tracing::info!("Served bandwidth test for {}", outcome.address),
            }
            if let Err(e) = sink.publish(&outcome).await {
                tracing::error!("Failed to publish responder outcome: {}", e);
            }
        }
    })
}
