//! # mesh-probe-agent
//!
//! Per-node agent for message-free, clock-synchronized network testing.
//!
//! Every node runs the same agent with the same node list. Each one builds
//! the same deterministic schedule, maps wall-clock time onto it, and in
//! every slot launches at most one test: a single ping, then an iperf3 run
//! if the ping answered. Nodes never coordinate over the network; agreement
//! comes from identical inputs and synchronized clocks.
//!
//! ## Architecture
//!
//! ```text
//!  reachability feed ──► ReachabilityGate ──┐
//!                                           │
//!  Clock ──► SlotClock ──► Schedule ──► SlotMachine ──► TestRunner ──► OutcomeSink
//!                                                          │
//!                                                        Prober (ping, iperf3)
//!
//!  BandwidthServer (iperf3 -s --one-off) ──► responder loop ──► OutcomeSink
//! ```
//!
//! Only configuration and schedule-invariant errors are fatal. Probe
//! failures become failed outcomes; feed and sink failures are logged.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod agent;
pub mod clock;
pub mod config;
pub mod error;
pub mod probe;
pub mod publish;
pub mod reachability;
pub mod responder;
pub mod runner;

pub use agent::{Agent, AgentSetup, AgentStats};
pub use clock::{Clock, MockClock, SystemClock};
pub use config::{Config, ConfigError};
pub use error::{AgentError, FeedError, Result, SinkError};
pub use probe::{BandwidthServer, CommandProber, IperfServer, MockProber, Prober};
pub use publish::{sink_from_config, ChannelSink, JsonLinesSink, OutcomeSink};
pub use reachability::{
    feed_from_config, spawn_feed_task, CommandFeed, FeedFormat, FileFeed, PeerDecoder, ReachabilityFeed,
    ReachabilityGate, StaticFeed,
};
pub use responder::{handle_server_output, spawn_responder};
pub use runner::TestRunner;
