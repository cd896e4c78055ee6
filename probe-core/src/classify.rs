//! Probe output classification.
//!
//! Turns raw probe results into [`TestOutcome`] records. Every result maps
//! to exactly one record; malformed output is a failed outcome, never an
//! error for the caller.

use probe_types::{NodeAddr, ProbeKind, Role, TestOutcome};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Raw payload recorded when bandwidth output is not valid JSON.
pub const INVALID_BANDWIDTH_JSON: &str = r#"{"error":"Invalid JSON output from iperf"}"#;

/// Probe execution failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    /// The probe process could not be started.
    #[error("failed to start probe: {0}")]
    Spawn(String),

    /// The probe exited unsuccessfully.
    #[error("probe exited with {}", exit_label(.code))]
    Exit {
        /// Exit code, `None` if killed by a signal.
        code: Option<i32>,
        /// Combined output.
        output: String,
    },

    /// The probe exceeded its timeout and was terminated.
    #[error("probe timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),

    /// The slot boundary passed before the probe could start.
    #[error("deadline passed")]
    DeadlinePassed,
}

impl ProbeError {
    /// Raw diagnostic payload for an outcome record.
    pub fn raw(&self) -> String {
        match self {
            Self::Exit { output, .. } if !output.trim().is_empty() => output.clone(),
            other => other.to_string(),
        }
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => c.to_string(),
        None => "signal".to_string(),
    }
}

/// Result of running one probe: raw output on success.
pub type ProbeResult = Result<String, ProbeError>;

/// Bandwidth output parse errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ThroughputError {
    /// Output is not JSON.
    #[error("bandwidth output is not valid JSON")]
    InvalidJson,

    /// Output is JSON carrying an `error` field.
    #[error("bandwidth probe reported error: {0}")]
    Reported(String),
}

/// Extract throughput in bits per second from iperf3 JSON output.
///
/// Reads `end.sum_received.bits_per_second`, falling back to
/// `end.sum.bits_per_second`. Valid JSON without either figure yields
/// `Ok(None)`.
pub fn parse_throughput(raw: &str) -> Result<Option<f64>, ThroughputError> {
    let value: Value = serde_json::from_str(raw).map_err(|_| ThroughputError::InvalidJson)?;
    if let Some(err) = value.get("error").and_then(Value::as_str) {
        return Err(ThroughputError::Reported(err.to_string()));
    }
    let end = &value["end"];
    Ok(end["sum_received"]["bits_per_second"]
        .as_f64()
        .or_else(|| end["sum"]["bits_per_second"].as_f64()))
}

/// Common context for outcome records.
#[derive(Debug, Clone)]
pub struct OutcomeContext {
    /// Partner address.
    pub address: NodeAddr,
    /// Our side of the edge.
    pub role: Role,
    /// Slot index, if known.
    pub slot: Option<usize>,
    /// Record time, ms since UNIX epoch.
    pub timestamp_ms: u64,
}

impl OutcomeContext {
    fn outcome(&self, kind: ProbeKind, success: bool, throughput_bps: Option<f64>, raw: String) -> TestOutcome {
        TestOutcome {
            address: self.address.clone(),
            role: self.role,
            kind,
            success,
            throughput_bps,
            raw,
            slot: self.slot,
            timestamp_ms: self.timestamp_ms,
        }
    }
}

/// Classify a connectivity probe result.
pub fn classify_connectivity(ctx: &OutcomeContext, result: &ProbeResult) -> TestOutcome {
    match result {
        Ok(raw) => ctx.outcome(ProbeKind::Connectivity, true, None, raw.clone()),
        Err(e) => ctx.outcome(ProbeKind::Connectivity, false, None, e.raw()),
    }
}

/// Classify a bandwidth probe result.
///
/// Success requires a clean exit and parseable output. Output that is not
/// JSON is replaced by [`INVALID_BANDWIDTH_JSON`].
pub fn classify_bandwidth(ctx: &OutcomeContext, result: &ProbeResult) -> TestOutcome {
    let (exited_ok, raw) = match result {
        Ok(raw) => (true, raw.clone()),
        Err(ProbeError::Exit { output, .. }) if !output.trim().is_empty() => (false, output.clone()),
        Err(e) => return ctx.outcome(ProbeKind::Bandwidth, false, None, e.raw()),
    };

    match parse_throughput(&raw) {
        Ok(throughput) => ctx.outcome(ProbeKind::Bandwidth, exited_ok, throughput, raw),
        Err(ThroughputError::InvalidJson) => {
            ctx.outcome(ProbeKind::Bandwidth, false, None, INVALID_BANDWIDTH_JSON.to_string())
        }
        Err(ThroughputError::Reported(_)) => ctx.outcome(ProbeKind::Bandwidth, false, None, raw),
    }
}

/// Summary of one completed server-side bandwidth run.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerReport {
    /// The client that connected.
    pub client: NodeAddr,
    /// Received throughput, if reported.
    pub throughput_bps: Option<f64>,
}

/// Parse iperf3 server JSON for the connecting client and throughput.
///
/// Returns `None` if the output is not JSON or names no client.
pub fn parse_server_report(raw: &str) -> Option<ServerReport> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let host = value["start"]["connected"].get(0)?["remote_host"].as_str()?;
    let client = NodeAddr::new(host).ok()?;
    let end = &value["end"];
    let throughput_bps = end["sum_received"]["bits_per_second"]
        .as_f64()
        .or_else(|| end["sum"]["bits_per_second"].as_f64());
    Some(ServerReport {
        client,
        throughput_bps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const IPERF_OK: &str = r#"{
        "start": {"connected": [{"remote_host": "10.19.30.101", "remote_port": 5201}]},
        "end": {"sum_sent": {"bits_per_second": 95000000.0},
                "sum_received": {"bits_per_second": 94000000.0}}
    }"#;

    fn ctx() -> OutcomeContext {
        OutcomeContext {
            address: NodeAddr::new("10.19.30.101").unwrap(),
            role: Role::Initiator,
            slot: Some(4),
            timestamp_ms: 1_000,
        }
    }

    #[test]
    fn throughput_from_sum_received() {
        assert_eq!(parse_throughput(IPERF_OK), Ok(Some(94_000_000.0)));
    }

    #[test]
    fn throughput_falls_back_to_sum() {
        let udp = r#"{"end": {"sum": {"bits_per_second": 1000.0}}}"#;
        assert_eq!(parse_throughput(udp), Ok(Some(1000.0)));
        assert_eq!(parse_throughput(r#"{"end": {}}"#), Ok(None));
    }

    #[test]
    fn throughput_rejects_garbage_and_reported_errors() {
        assert_eq!(parse_throughput("iperf3: error"), Err(ThroughputError::InvalidJson));
        assert_eq!(
            parse_throughput(r#"{"error": "unable to connect to server"}"#),
            Err(ThroughputError::Reported("unable to connect to server".into()))
        );
    }

    #[test]
    fn connectivity_success_and_failure() {
        let ok = classify_connectivity(&ctx(), &Ok("1 packets transmitted, 1 received".into()));
        assert!(ok.success);
        assert_eq!(ok.kind, ProbeKind::Connectivity);
        assert_eq!(ok.slot, Some(4));

        let failed = classify_connectivity(
            &ctx(),
            &Err(ProbeError::Exit {
                code: Some(1),
                output: "100% packet loss".into(),
            }),
        );
        assert!(!failed.success);
        assert_eq!(failed.raw, "100% packet loss");
    }

    #[test]
    fn timeout_is_failed_outcome() {
        let outcome = classify_connectivity(&ctx(), &Err(ProbeError::TimedOut(Duration::from_millis(249))));
        assert!(!outcome.success);
        assert_eq!(outcome.raw, "probe timed out after 249ms");
    }

    #[test]
    fn bandwidth_success_carries_throughput() {
        let outcome = classify_bandwidth(&ctx(), &Ok(IPERF_OK.into()));
        assert!(outcome.success);
        assert_eq!(outcome.throughput_mbps(), Some(94.0));
        assert_eq!(outcome.raw, IPERF_OK);
    }

    #[test]
    fn malformed_bandwidth_output_is_failure() {
        let outcome = classify_bandwidth(&ctx(), &Ok("not json at all".into()));
        assert!(!outcome.success);
        assert_eq!(outcome.raw, INVALID_BANDWIDTH_JSON);
    }

    #[test]
    fn bandwidth_nonzero_exit_keeps_json_error() {
        let raw = r#"{"error": "the server is busy running a test"}"#;
        let outcome = classify_bandwidth(
            &ctx(),
            &Err(ProbeError::Exit {
                code: Some(1),
                output: raw.into(),
            }),
        );
        assert!(!outcome.success);
        assert_eq!(outcome.raw, raw);
    }

    #[test]
    fn bandwidth_nonzero_exit_with_valid_json_is_still_failure() {
        let outcome = classify_bandwidth(
            &ctx(),
            &Err(ProbeError::Exit {
                code: Some(1),
                output: IPERF_OK.into(),
            }),
        );
        assert!(!outcome.success);
    }

    #[test]
    fn bandwidth_deadline_and_spawn_errors() {
        let late = classify_bandwidth(&ctx(), &Err(ProbeError::DeadlinePassed));
        assert_eq!(late.raw, "deadline passed");

        let missing = classify_bandwidth(&ctx(), &Err(ProbeError::Spawn("iperf3: not found".into())));
        assert!(!missing.success);
        assert_eq!(missing.raw, "failed to start probe: iperf3: not found");
    }

    #[test]
    fn exit_error_display_handles_signal() {
        let killed = ProbeError::Exit {
            code: None,
            output: String::new(),
        };
        assert_eq!(killed.to_string(), "probe exited with signal");
        assert_eq!(killed.raw(), "probe exited with signal");
    }

    #[test]
    fn server_report_names_client() {
        let report = parse_server_report(IPERF_OK).unwrap();
        assert_eq!(report.client, NodeAddr::new("10.19.30.101").unwrap());
        assert_eq!(report.throughput_bps, Some(94_000_000.0));
    }

    #[test]
    fn server_report_without_client_is_none() {
        assert!(parse_server_report(r#"{"start": {"connected": []}}"#).is_none());
        assert!(parse_server_report("garbage").is_none());
    }
}
