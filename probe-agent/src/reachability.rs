//! Reachability gate and feeds.
//!
//! The gate holds the latest set of reachable peers. Feeds replace that set
//! wholesale; the tick loop takes a snapshot and never waits on a feed. Until
//! the first update arrives the set is empty and every test is skipped.
//!
//! How reachability is obtained (radio status over SSH, a routing daemon, a
//! file dropped by another process) is the feed's business. The agent only
//! sees [`ReachabilityFeed::poll`].

use crate::config::{FeedConfig, FeedKind};
use crate::error::{FeedError, FeedResult};
use async_trait::async_trait;
use probe_types::{NodeAddr, PeerList};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Default)]
struct Snapshot {
    peers: Arc<HashSet<NodeAddr>>,
    updates: u64,
}

/// Shared view of which peers are currently reachable.
///
/// Cloning is cheap; clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct ReachabilityGate {
    inner: Arc<RwLock<Snapshot>>,
}

impl ReachabilityGate {
    /// Create an empty gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the reachable set.
    pub fn replace(&self, peers: HashSet<NodeAddr>) {
        let peers = Arc::new(peers);
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        guard.peers = peers;
        guard.updates += 1;
    }

    /// Current reachable set.
    pub fn snapshot(&self) -> Arc<HashSet<NodeAddr>> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard.peers)
    }

    /// Returns true if `addr` is in the current set.
    pub fn is_reachable(&self, addr: &NodeAddr) -> bool {
        self.snapshot().contains(addr)
    }

    /// Number of updates applied so far.
    pub fn update_count(&self) -> u64 {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .updates
    }
}

/// Feed payload format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedFormat {
    /// `{"peers": ["10.0.0.1", ...]}`.
    #[default]
    PeerList,
    /// Radio status JSON with `mesh_stats[].orig_address` MACs.
    MeshStats,
}

#[derive(Debug, Deserialize)]
struct MeshStatus {
    #[serde(default)]
    mesh_stats: Vec<MeshEntry>,
}

#[derive(Debug, Deserialize)]
struct MeshEntry {
    #[serde(default)]
    orig_address: String,
}

/// Decodes feed payloads into peer sets.
#[derive(Debug, Clone, Default)]
pub struct PeerDecoder {
    format: FeedFormat,
    mac_to_ip: HashMap<String, NodeAddr>,
}

impl PeerDecoder {
    /// Create a decoder. MAC keys are matched case-insensitively.
    pub fn new(format: FeedFormat, mac_to_ip: impl IntoIterator<Item = (String, NodeAddr)>) -> Self {
        Self {
            format,
            mac_to_ip: mac_to_ip
                .into_iter()
                .map(|(mac, ip)| (mac.to_lowercase(), ip))
                .collect(),
        }
    }

    /// Decode a payload.
    pub fn decode(&self, text: &str) -> FeedResult<HashSet<NodeAddr>> {
        match self.format {
            FeedFormat::PeerList => PeerList::from_json(text)
                .map(PeerList::into_set)
                .map_err(|e| FeedError::Parse(e.to_string())),
            FeedFormat::MeshStats => {
                let status: MeshStatus =
                    serde_json::from_str(text).map_err(|e| FeedError::Parse(e.to_string()))?;
                Ok(status
                    .mesh_stats
                    .iter()
                    .filter_map(|entry| self.mac_to_ip.get(&entry.orig_address.to_lowercase()))
                    .cloned()
                    .collect())
            }
        }
    }
}

/// A source of reachability updates.
#[async_trait]
pub trait ReachabilityFeed: Send + Sync {
    /// Fetch the current reachable set.
    async fn poll(&self) -> FeedResult<HashSet<NodeAddr>>;
}

/// Reads a feed payload from a file on every poll.
#[derive(Debug, Clone)]
pub struct FileFeed {
    path: PathBuf,
    decoder: PeerDecoder,
}

impl FileFeed {
    /// Create a file feed.
    pub fn new(path: impl Into<PathBuf>, decoder: PeerDecoder) -> Self {
        Self {
            path: path.into(),
            decoder,
        }
    }
}

#[async_trait]
impl ReachabilityFeed for FileFeed {
    async fn poll(&self) -> FeedResult<HashSet<NodeAddr>> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        self.decoder.decode(&text)
    }
}

/// Runs a command on every poll and decodes its stdout.
///
/// An SSH command reading the radio's status file fits here.
#[derive(Debug, Clone)]
pub struct CommandFeed {
    argv: Vec<String>,
    timeout: Duration,
    decoder: PeerDecoder,
}

impl CommandFeed {
    /// Create a command feed. `argv[0]` is the program.
    pub fn new(argv: Vec<String>, timeout: Duration, decoder: PeerDecoder) -> Self {
        Self {
            argv,
            timeout,
            decoder,
        }
    }
}

#[async_trait]
impl ReachabilityFeed for CommandFeed {
    async fn poll(&self) -> FeedResult<HashSet<NodeAddr>> {
        let Some((program, args)) = self.argv.split_first() else {
            return Err(FeedError::Parse("empty feed command".into()));
        };

        let run = tokio::process::Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| FeedError::Timeout(self.timeout))??;

        if !output.status.success() {
            return Err(FeedError::CommandFailed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        self.decoder.decode(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Always reports the same set.
#[derive(Debug, Clone, Default)]
pub struct StaticFeed {
    peers: HashSet<NodeAddr>,
}

impl StaticFeed {
    /// Create a static feed.
    pub fn new(peers: impl IntoIterator<Item = NodeAddr>) -> Self {
        Self {
            peers: peers.into_iter().collect(),
        }
    }
}

#[async_trait]
impl ReachabilityFeed for StaticFeed {
    async fn poll(&self) -> FeedResult<HashSet<NodeAddr>> {
        Ok(self.peers.clone())
    }
}

/// Build the configured feed, or `None` for `kind = "none"`.
pub fn feed_from_config(config: &FeedConfig) -> Option<Arc<dyn ReachabilityFeed>> {
    let decoder = PeerDecoder::new(config.format, config.mac_to_ip.clone());
    match config.kind {
        FeedKind::None => None,
        FeedKind::File => {
            let path = config.path.clone()?;
            Some(Arc::new(FileFeed::new(path, decoder)))
        }
        FeedKind::Command => Some(Arc::new(CommandFeed::new(
            config.command.clone(),
            Duration::from_millis(config.timeout_ms),
            decoder,
        ))),
    }
}

/// Spawn a background task that polls `feed` and updates `gate`.
///
/// Failed polls are logged and the previous set is kept.
/// Returns a handle that can be used to abort the task.
pub fn spawn_feed_task(
    gate: ReachabilityGate,
    feed: Arc<dyn ReachabilityFeed>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("Reachability feed started (interval: {:?})", every);

        let mut timer = interval(every);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            timer.tick().await;

            match feed.poll().await {
                Ok(peers) => {
                    tracing::debug!("Reachability: {} peers", peers.len());
                    gate.replace(peers);
                }
                Err(e) => {
                    tracing::warn!("Reachability feed error, keeping previous set: {}", e);
                }
            }
        }
    })
}
