//! mesh-probe binary entry point.
//!
//! Usage:
//! ```bash
//! mesh-probe --config mesh-probe.toml            # run the agent
//! mesh-probe --config mesh-probe.toml schedule   # print the schedule
//! mesh-probe --config mesh-probe.toml whoami     # print this node's role
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mesh_probe_agent::{
    feed_from_config, sink_from_config, spawn_feed_task, spawn_responder, Agent, AgentSetup, Clock, CommandProber,
    Config, IperfServer, ReachabilityGate, SystemClock,
};
use probe_core::build_schedule;
use probe_types::NodeAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Clock-synchronized connectivity and bandwidth testing for mesh networks.
#[derive(Parser, Debug)]
#[command(name = "mesh-probe")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, short, global = true, default_value = "mesh-probe.toml")]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG is set
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Hostname used to look up this node in [network.hosts]
    #[arg(long, global = true)]
    hostname: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the agent until Ctrl-C (default)
    Run,

    /// Print the schedule and its fingerprint
    Schedule,

    /// Print this node's address and the slots it initiates
    Whoami,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "mesh_probe=debug,mesh_probe_agent=debug"
    } else {
        "mesh_probe=info,mesh_probe_agent=info"
    };
    // Outcomes may go to stdout, so logs go to stderr.
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = Config::from_file(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    config.validate().context("Invalid configuration")?;
    if cli.hostname.is_some() {
        config.node.hostname = cli.hostname;
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Schedule => print_schedule(&config),
        Commands::Whoami => whoami(&config),
    }
}

async fn run(config: Config) -> Result<()> {
    let self_addr = config
        .resolve_self_from_os()
        .context("Failed to resolve own node address")?;
    tracing::info!("Starting mesh-probe v{} as {}", env!("CARGO_PKG_VERSION"), self_addr);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let gate = ReachabilityGate::new();
    let sink = sink_from_config(&config.output)
        .await
        .context("Failed to open outcome sink")?;

    let feed_task = match feed_from_config(&config.feed) {
        Some(feed) => Some(spawn_feed_task(
            gate.clone(),
            feed,
            Duration::from_millis(config.feed.interval_ms),
        )),
        None => {
            tracing::warn!("No reachability feed configured; every slot will be skipped");
            None
        }
    };

    let responder_task = config.responder.enabled.then(|| {
        spawn_responder(
            Arc::new(IperfServer::new(&config.probe.iperf_program)),
            Arc::clone(&sink),
            Arc::clone(&clock),
        )
    });

    let setup = AgentSetup {
        self_addr,
        nodes: config.node_set(),
        non_initiators: config.non_initiator_set(),
        timing: config.timing.slot_timing(),
    };
    let agent = Agent::new(
        setup,
        clock,
        gate,
        Arc::new(CommandProber::from_config(&config.probe)),
        sink,
    )?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let stats = agent.run(config.timing.tick(), shutdown).await?;

    for task in feed_task.into_iter().chain(responder_task) {
        task.abort();
    }
    tracing::info!(
        "Stopped: {} launched, {} unreachable, {} window closed, {} busy, {} outcomes",
        stats.launched,
        stats.skipped_unreachable,
        stats.skipped_window_closed,
        stats.skipped_busy,
        stats.outcomes
    );
    Ok(())
}

fn print_schedule(config: &Config) -> Result<()> {
    let schedule = build_schedule(&config.node_set(), &config.non_initiator_set())?;
    let timing = config.timing.slot_timing();

    println!("fingerprint: {}", schedule.fingerprint());
    println!(
        "slots: {} x {:?} = {:?} per cycle",
        schedule.num_slots(),
        timing.slot_length(),
        timing.slot_length() * schedule.num_slots() as u32
    );
    for (index, slot) in schedule.iter().enumerate() {
        let edges: Vec<String> = slot.edges().iter().map(ToString::to_string).collect();
        println!("{index:>4}: {}", edges.join(", "));
    }
    Ok(())
}

fn whoami(config: &Config) -> Result<()> {
    let self_addr: NodeAddr = config
        .resolve_self_from_os()
        .context("Failed to resolve own node address")?;
    let schedule = build_schedule(&config.node_set(), &config.non_initiator_set())?;

    println!("address: {self_addr}");
    println!("initiates in slots: {:?}", schedule.initiator_slots(&self_addr));
    Ok(())
}
