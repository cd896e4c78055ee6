//! The per-node slot loop.
//!
//! Every tick the agent reads the wall clock, works out the current slot,
//! asks the schedule what this node does in it, checks the reachable set,
//! and feeds all of that to the [`SlotMachine`]. The machine decides; the
//! agent only executes. Probes run in a spawned task so the tick loop never
//! blocks on them.
//!
//! Nodes never exchange messages. Two agents configured with the same node
//! set build the same schedule and, with synchronized clocks, agree on
//! every slot.

use crate::clock::Clock;
use crate::config::ConfigError;
use crate::error::Result;
use crate::probe::Prober;
use crate::publish::OutcomeSink;
use crate::reachability::ReachabilityGate;
use crate::runner::TestRunner;
use probe_core::{
    build_schedule, expected_initiator, resolve_role, Action, Event, Schedule, SkipReason, SlotClock, SlotMachine,
    SlotTiming, TickInput,
};
use probe_types::{NodeAddr, TestOutcome};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Static inputs for an agent.
#[derive(Debug, Clone)]
pub struct AgentSetup {
    /// This node.
    pub self_addr: NodeAddr,
    /// All participating nodes.
    pub nodes: Vec<NodeAddr>,
    /// Nodes that never initiate.
    pub non_initiators: BTreeSet<NodeAddr>,
    /// Slot timing.
    pub timing: SlotTiming,
}

/// Counters since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgentStats {
    /// Slots in which probes were started.
    pub launched: u64,
    /// Slots in which this node initiated nothing.
    pub skipped_not_scheduled: u64,
    /// Slots skipped because the partner was unreachable.
    pub skipped_unreachable: u64,
    /// Slots skipped because too little of the window remained.
    pub skipped_window_closed: u64,
    /// Slots skipped because the previous run was still in flight.
    pub skipped_busy: u64,
    /// Outcomes produced by finished runs.
    pub outcomes: u64,
}

/// Slot-scheduled test agent for one node.
pub struct Agent {
    self_addr: NodeAddr,
    schedule: Schedule,
    slot_clock: SlotClock,
    machine: SlotMachine,
    clock: Arc<dyn Clock>,
    gate: ReachabilityGate,
    runner: TestRunner,
    in_flight: Option<JoinHandle<Vec<TestOutcome>>>,
    waiting_for: Option<Duration>,
    stats: AgentStats,
}

impl Agent {
    /// Build the schedule and create an agent.
    ///
    /// # Errors
    ///
    /// Fails if the timing is inconsistent, this node is not in the node
    /// set, or the schedule fails verification.
    pub fn new(
        setup: AgentSetup,
        clock: Arc<dyn Clock>,
        gate: ReachabilityGate,
        prober: Arc<dyn Prober>,
        sink: Arc<dyn OutcomeSink>,
    ) -> Result<Self> {
        setup.timing.validate()?;

        if !setup.nodes.contains(&setup.self_addr) {
            return Err(ConfigError::UnknownSelf {
                identity: format!("address {}", setup.self_addr),
            }
            .into());
        }

        let schedule = build_schedule(&setup.nodes, &setup.non_initiators)?;
        let slot_clock = SlotClock::new(setup.timing, schedule.num_slots());

        tracing::info!(
            "Schedule {}: {} edges in {} slots of {:?} (cycle {:?})",
            schedule.fingerprint(),
            schedule.edge_count(),
            schedule.num_slots(),
            setup.timing.slot_length(),
            slot_clock.cycle_length()
        );
        tracing::info!(
            "Node {} initiates in slots {:?}",
            setup.self_addr,
            schedule.initiator_slots(&setup.self_addr)
        );

        let runner = TestRunner::new(prober, sink, Arc::clone(&clock), setup.timing);

        Ok(Self {
            self_addr: setup.self_addr,
            schedule,
            slot_clock,
            machine: SlotMachine::new(),
            clock,
            gate,
            runner,
            in_flight: None,
            waiting_for: None,
            stats: AgentStats::default(),
        })
    }

    /// The schedule in use.
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// The slot timing in use.
    pub fn timing(&self) -> &SlotTiming {
        self.slot_clock.timing()
    }

    /// Counters since startup.
    pub fn stats(&self) -> AgentStats {
        self.stats
    }

    /// Returns true while a run is in flight.
    pub fn is_running(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Process one tick.
    ///
    /// # Errors
    ///
    /// Fails only if the schedule is corrupted.
    pub async fn tick(&mut self) -> Result<()> {
        if self.in_flight.as_ref().is_some_and(JoinHandle::is_finished) {
            self.reap().await;
        }

        let Some(position) = self.slot_clock.position(self.clock.now()) else {
            return Ok(());
        };
        let partner = match self.schedule.slot(position.index) {
            Some(slot) => resolve_role(slot, &self.self_addr)?,
            None => None,
        };
        let partner_reachable = partner.as_ref().is_some_and(|p| self.gate.is_reachable(p));

        let input = TickInput {
            position,
            partner,
            partner_reachable,
        };
        let timing = *self.slot_clock.timing();
        for action in self.machine.on_event(Event::Tick(input), &timing) {
            self.execute(action);
        }
        Ok(())
    }

    /// Wait for the in-flight run, if any, to finish.
    pub async fn wait_idle(&mut self) {
        if self.in_flight.is_some() {
            self.reap().await;
        }
    }

    /// Tick every `every` until `shutdown` completes.
    ///
    /// An in-flight run is aborted on shutdown, which kills its probe.
    ///
    /// # Errors
    ///
    /// Fails only if the schedule is corrupted.
    pub async fn run(mut self, every: Duration, shutdown: impl Future<Output = ()>) -> Result<AgentStats> {
        tracing::info!("Agent {} running (tick: {:?})", self.self_addr, every);

        let mut timer = interval(every);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested");
                    break Ok(());
                }
                _ = timer.tick() => {
                    if let Err(e) = self.tick().await {
                        break Err(e);
                    }
                }
            }
        };

        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
        result.map(|()| self.stats)
    }

    fn execute(&mut self, action: Action) {
        match action {
            Action::Wait { next_slot_at } => {
                // Once per slot, not once per tick.
                if self.waiting_for != Some(next_slot_at) {
                    self.waiting_for = Some(next_slot_at);
                    tracing::debug!("Outside launch window, next slot at {:?}", next_slot_at);
                }
            }
            Action::Skip { epoch, index, reason } => self.record_skip(epoch, index, reason),
            Action::Launch(plan) => {
                tracing::info!(
                    "Slot {} (epoch {}): testing {} (connect timeout {:?})",
                    plan.index,
                    plan.epoch,
                    plan.partner,
                    plan.connect_timeout
                );
                let runner = self.runner.clone();
                self.in_flight = Some(tokio::spawn(async move { runner.run(&plan).await }));
                let timing = *self.slot_clock.timing();
                self.machine.on_event(Event::Launched, &timing);
                self.stats.launched += 1;
            }
        }
    }

    fn record_skip(&mut self, epoch: u64, index: usize, reason: SkipReason) {
        match reason {
            SkipReason::NotScheduled => {
                self.stats.skipped_not_scheduled += 1;
                let tester = self
                    .schedule
                    .slot(index)
                    .and_then(|slot| expected_initiator(slot, &self.self_addr));
                match tester {
                    Some(initiator) => {
                        tracing::debug!("Slot {} (epoch {}): expecting test from {}", index, epoch, initiator)
                    }
                    None => tracing::debug!("Slot {} (epoch {}): idle", index, epoch),
                }
            }
            SkipReason::Unreachable => {
                self.stats.skipped_unreachable += 1;
                tracing::info!("Slot {} (epoch {}): partner unreachable, skipping", index, epoch);
            }
            SkipReason::Busy => {
                self.stats.skipped_busy += 1;
                tracing::warn!("Slot {} (epoch {}): previous test still running, skipping", index, epoch);
            }
            SkipReason::WindowClosed => {
                self.stats.skipped_window_closed += 1;
                tracing::info!("Slot {} (epoch {}): launch window closed, skipping", index, epoch);
            }
        }
    }

    async fn reap(&mut self) {
        let Some(handle) = self.in_flight.take() else {
            return;
        };
        match handle.await {
            Ok(outcomes) => self.stats.outcomes += outcomes.len() as u64,
            Err(e) => tracing::warn!("Probe task failed: {}", e),
        }
        let timing = *self.slot_clock.timing();
        self.machine.on_event(Event::Completed, &timing);
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("self_addr", &self.self_addr)
            .field("num_slots", &self.schedule.num_slots())
            .field("state", self.machine.state())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
