//! Configuration loading for probe-agent.
//!
//! Configuration is loaded from a TOML file (default: `mesh-probe.toml`).
//! Every node is expected to run with the same `[network]` and `[timing]`
//! sections; those two sections fully determine the schedule.

use crate::reachability::FeedFormat;
use probe_core::{SlotTiming, TimingError};
use probe_types::NodeAddr;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for probe-agent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Self identity.
    #[serde(default)]
    pub node: NodeConfig,
    /// Participating nodes.
    #[serde(default)]
    pub network: NetworkConfig,
    /// Slot timing.
    #[serde(default)]
    pub timing: TimingConfig,
    /// Probe programs.
    #[serde(default)]
    pub probe: ProbeConfig,
    /// Reachability feed.
    #[serde(default)]
    pub feed: FeedConfig,
    /// Outcome publication.
    #[serde(default)]
    pub output: OutputConfig,
    /// Responder (bandwidth server) loop.
    #[serde(default)]
    pub responder: ResponderConfig,
}

/// Self identity configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeConfig {
    /// Explicit self address. Takes precedence over hostname lookup.
    pub address: Option<NodeAddr>,
    /// Hostname to look up in `[network.hosts]` (default: OS hostname).
    pub hostname: Option<String>,
}

/// Participating nodes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkConfig {
    /// Every node address taking part in the schedule.
    #[serde(default)]
    pub nodes: Vec<NodeAddr>,
    /// Nodes that receive tests but never initiate them.
    #[serde(default)]
    pub non_initiators: Vec<NodeAddr>,
    /// Hostname to address table used to resolve self identity.
    #[serde(default)]
    pub hosts: BTreeMap<String, NodeAddr>,
}

/// Slot timing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
    /// Bandwidth probe duration in milliseconds (default: 3000).
    #[serde(default = "default_probe_duration_ms")]
    pub probe_duration_ms: u64,
    /// Guard margin in milliseconds (default: 500).
    #[serde(default = "default_guard_ms")]
    pub guard_ms: u64,
    /// Launch window in milliseconds (default: half the guard).
    pub window_ms: Option<u64>,
    /// Tick interval in milliseconds (default: 50).
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Tolerated clock skew per node in milliseconds (default: 50).
    #[serde(default = "default_max_clock_skew_ms")]
    pub max_clock_skew_ms: u64,
    /// Cap on the connectivity probe timeout in milliseconds (default: 250).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// Probe program configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    /// Connectivity probe program (default: `ping`).
    #[serde(default = "default_ping_program")]
    pub ping_program: String,
    /// Bandwidth probe program (default: `iperf3`).
    #[serde(default = "default_iperf_program")]
    pub iperf_program: String,
}

/// Where reachability updates come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    /// No feed; nothing is ever reachable.
    #[default]
    None,
    /// Re-read a file.
    File,
    /// Re-run a command and read its stdout.
    Command,
}

/// Reachability feed configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Feed source kind (default: none).
    #[serde(default)]
    pub kind: FeedKind,
    /// File to read for `kind = "file"`.
    pub path: Option<PathBuf>,
    /// Argv to run for `kind = "command"`.
    #[serde(default)]
    pub command: Vec<String>,
    /// Payload format (default: peer_list).
    #[serde(default)]
    pub format: FeedFormat,
    /// Poll interval in milliseconds (default: 1000).
    #[serde(default = "default_feed_interval_ms")]
    pub interval_ms: u64,
    /// Command timeout in milliseconds (default: 5000).
    #[serde(default = "default_feed_timeout_ms")]
    pub timeout_ms: u64,
    /// MAC to address table for `format = "mesh_stats"`.
    #[serde(default)]
    pub mac_to_ip: BTreeMap<String, NodeAddr>,
}

/// Outcome destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// JSON lines on stdout.
    #[default]
    Stdout,
    /// JSON lines appended to a file.
    File,
}

/// Outcome publication configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    /// Destination kind (default: stdout).
    #[serde(default)]
    pub kind: OutputKind,
    /// File for `kind = "file"`.
    pub path: Option<PathBuf>,
}

/// Responder loop configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponderConfig {
    /// Run a one-off bandwidth server in a loop (default: false).
    #[serde(default)]
    pub enabled: bool,
}

// Default value functions
fn default_probe_duration_ms() -> u64 {
    3000
}

fn default_guard_ms() -> u64 {
    500
}

fn default_tick_ms() -> u64 {
    50
}

fn default_max_clock_skew_ms() -> u64 {
    50
}

fn default_connect_timeout_ms() -> u64 {
    250
}

fn default_ping_program() -> String {
    "ping".to_string()
}

fn default_iperf_program() -> String {
    "iperf3".to_string()
}

fn default_feed_interval_ms() -> u64 {
    1000
}

fn default_feed_timeout_ms() -> u64 {
    5000
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            probe_duration_ms: default_probe_duration_ms(),
            guard_ms: default_guard_ms(),
            window_ms: None,
            tick_ms: default_tick_ms(),
            max_clock_skew_ms: default_max_clock_skew_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            ping_program: default_ping_program(),
            iperf_program: default_iperf_program(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            kind: FeedKind::default(),
            path: None,
            command: Vec::new(),
            format: FeedFormat::default(),
            interval_ms: default_feed_interval_ms(),
            timeout_ms: default_feed_timeout_ms(),
            mac_to_ip: BTreeMap::new(),
        }
    }
}

impl TimingConfig {
    /// Convert to slot timing parameters.
    pub fn slot_timing(&self) -> SlotTiming {
        let guard = Duration::from_millis(self.guard_ms);
        let timing = SlotTiming::new(Duration::from_millis(self.probe_duration_ms), guard)
            .with_max_clock_skew(Duration::from_millis(self.max_clock_skew_ms))
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms));
        match self.window_ms {
            Some(ms) => timing.with_window(Duration::from_millis(ms)),
            None => timing,
        }
    }

    /// Tick interval.
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// The node set: deduplicated and sorted.
    pub fn node_set(&self) -> Vec<NodeAddr> {
        let set: BTreeSet<NodeAddr> = self.network.nodes.iter().cloned().collect();
        set.into_iter().collect()
    }

    /// The non-initiating subset.
    pub fn non_initiator_set(&self) -> BTreeSet<NodeAddr> {
        self.network.non_initiators.iter().cloned().collect()
    }

    /// Check cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns the first inconsistency found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let nodes: BTreeSet<&NodeAddr> = self.network.nodes.iter().collect();

        for addr in &self.network.non_initiators {
            if !nodes.contains(addr) {
                return Err(ConfigError::UnknownNode {
                    field: "network.non_initiators",
                    node: addr.clone(),
                });
            }
        }
        for addr in self.network.hosts.values() {
            if !nodes.contains(addr) {
                return Err(ConfigError::UnknownNode {
                    field: "network.hosts",
                    node: addr.clone(),
                });
            }
        }

        self.timing.slot_timing().validate()?;
        if self.timing.tick_ms == 0 {
            return Err(ConfigError::Invalid("timing.tick_ms must be greater than zero"));
        }

        match self.feed.kind {
            FeedKind::File if self.feed.path.is_none() => {
                return Err(ConfigError::Invalid("feed.path is required for kind = \"file\""));
            }
            FeedKind::Command if self.feed.command.is_empty() => {
                return Err(ConfigError::Invalid("feed.command is required for kind = \"command\""));
            }
            _ => {}
        }

        if self.output.kind == OutputKind::File && self.output.path.is_none() {
            return Err(ConfigError::Invalid("output.path is required for kind = \"file\""));
        }

        Ok(())
    }

    /// Resolve this node's address.
    ///
    /// Uses `node.address` if set, otherwise looks up `node.hostname` (or
    /// `os_hostname`) in `network.hosts`. The result must be in the node set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownSelf`] if no address can be resolved or
    /// it is not a participating node.
    pub fn resolve_self(&self, os_hostname: Option<&str>) -> Result<NodeAddr, ConfigError> {
        let hostname = self.node.hostname.as_deref().or(os_hostname);

        let addr = match (&self.node.address, hostname) {
            (Some(addr), _) => addr.clone(),
            (None, Some(host)) => {
                self.network
                    .hosts
                    .get(host)
                    .cloned()
                    .ok_or_else(|| ConfigError::UnknownSelf {
                        identity: format!("hostname {host}"),
                    })?
            }
            (None, None) => {
                return Err(ConfigError::UnknownSelf {
                    identity: "unset address and hostname".to_string(),
                })
            }
        };

        if !self.network.nodes.contains(&addr) {
            return Err(ConfigError::UnknownSelf {
                identity: format!("address {addr}"),
            });
        }
        Ok(addr)
    }

    /// Resolve this node's address using the OS hostname for lookup.
    pub fn resolve_self_from_os(&self) -> Result<NodeAddr, ConfigError> {
        let os_hostname = hostname::get()
            .ok()
            .map(|h| h.to_string_lossy().into_owned());
        self.resolve_self(os_hostname.as_deref())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A field names a node that is not in `network.nodes`.
    #[error("{field} names {node}, which is not in network.nodes")]
    UnknownNode {
        /// Offending field.
        field: &'static str,
        /// The unknown node.
        node: NodeAddr,
    },
    /// This node's identity is undefined or not a participant.
    #[error("cannot determine own node address ({identity})")]
    UnknownSelf {
        /// What was tried.
        identity: String,
    },
    /// Slot timing is inconsistent.
    #[error("invalid timing: {0}")]
    Timing(#[from] TimingError),
    /// Other invalid setting.
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}
