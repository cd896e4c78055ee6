//! Probes backed by `ping` and `iperf3` child processes.

use super::{BandwidthServer, Prober};
use crate::config::ProbeConfig;
use async_trait::async_trait;
use probe_core::{ProbeError, ProbeResult};
use probe_types::NodeAddr;
use std::time::Duration;

/// Run a program to completion, capturing output.
///
/// The child is killed if the returned future is dropped.
async fn run_program(program: &str, args: &[String]) -> ProbeResult {
    let output = tokio::process::Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ProbeError::Spawn(format!("{program}: {e}")))?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&stderr);
    }

    if output.status.success() {
        Ok(text)
    } else {
        Err(ProbeError::Exit {
            code: output.status.code(),
            output: text,
        })
    }
}

/// Whole seconds for command-line flags, at least one.
fn whole_secs(d: Duration) -> u64 {
    d.as_secs_f64().ceil().max(1.0) as u64
}

/// Runs `ping` and `iperf3` as child processes.
#[derive(Debug, Clone)]
pub struct CommandProber {
    ping_program: String,
    iperf_program: String,
}

impl CommandProber {
    /// Create a prober using the given programs.
    pub fn new(ping_program: impl Into<String>, iperf_program: impl Into<String>) -> Self {
        Self {
            ping_program: ping_program.into(),
            iperf_program: iperf_program.into(),
        }
    }

    /// Create a prober from configuration.
    pub fn from_config(config: &ProbeConfig) -> Self {
        Self::new(&config.ping_program, &config.iperf_program)
    }

    /// Arguments for a single echo request.
    pub fn ping_args(addr: &NodeAddr, timeout: Duration) -> Vec<String> {
        vec![
            "-c".into(),
            "1".into(),
            "-W".into(),
            whole_secs(timeout).to_string(),
            addr.to_string(),
        ]
    }

    /// Arguments for a JSON-reporting throughput test.
    pub fn iperf_args(addr: &NodeAddr, duration: Duration) -> Vec<String> {
        vec![
            "-c".into(),
            addr.to_string(),
            "-t".into(),
            whole_secs(duration).to_string(),
            "-b".into(),
            "0".into(),
            "--json".into(),
        ]
    }
}

#[async_trait]
impl Prober for CommandProber {
    async fn connectivity(&self, addr: &NodeAddr, timeout: Duration) -> ProbeResult {
        run_program(&self.ping_program, &Self::ping_args(addr, timeout)).await
    }

    async fn bandwidth(&self, addr: &NodeAddr, duration: Duration, _timeout: Duration) -> ProbeResult {
        run_program(&self.iperf_program, &Self::iperf_args(addr, duration)).await
    }
}

/// Runs `iperf3 -s --json --one-off`: one client, then exit.
#[derive(Debug, Clone)]
pub struct IperfServer {
    program: String,
}

impl IperfServer {
    /// Create a server wrapper around `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Arguments for a single-client server run.
    pub fn args() -> Vec<String> {
        vec!["-s".into(), "--json".into(), "--one-off".into()]
    }
}

#[async_trait]
impl BandwidthServer for IperfServer {
    async fn serve_once(&self) -> ProbeResult {
        run_program(&self.program, &Self::args()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> NodeAddr {
        NodeAddr::new(s).unwrap()
    }

    #[test]
    fn ping_args_round_timeout_up() {
        assert_eq!(
            CommandProber::ping_args(&addr("10.0.0.2"), Duration::from_millis(249)),
            vec!["-c", "1", "-W", "1", "10.0.0.2"]
        );
        assert_eq!(
            CommandProber::ping_args(&addr("10.0.0.2"), Duration::from_millis(2100))[3],
            "3"
        );
    }

    #[test]
    fn iperf_args_request_json() {
        assert_eq!(
            CommandProber::iperf_args(&addr("10.0.0.3"), Duration::from_secs(3)),
            vec!["-c", "10.0.0.3", "-t", "3", "-b", "0", "--json"]
        );
        assert_eq!(IperfServer::args(), vec!["-s", "--json", "--one-off"]);
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let prober = CommandProber::new("/nonexistent/ping-xyz", "/nonexistent/iperf-xyz");
        let result = prober
            .connectivity(&addr("127.0.0.1"), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(ProbeError::Spawn(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_captures_code() {
        let result = run_program("sh", &["-c".into(), "echo lost; exit 2".into()]).await;
        assert_eq!(
            result,
            Err(ProbeError::Exit {
                code: Some(2),
                output: "lost\n".into(),
            })
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dropped_probe_is_cut_short() {
        let started = std::time::Instant::now();
        let args = ["30".to_string()];
        let run = run_program("sleep", &args);
        let result = tokio::time::timeout(Duration::from_millis(100), run).await;
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
