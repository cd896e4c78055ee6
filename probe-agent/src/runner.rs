//! Runs one slot's probes.
//!
//! Connectivity first, then bandwidth only if the partner answered. Each
//! probe is wrapped in a hard timeout; the probe future is dropped when it
//! fires, which kills the child process.

use crate::clock::Clock;
use crate::probe::Prober;
use crate::publish::OutcomeSink;
use probe_core::{
    bandwidth_timeout, classify_bandwidth, classify_connectivity, LaunchPlan, OutcomeContext, ProbeError,
    ProbeResult, SlotTiming,
};
use probe_types::{Role, TestOutcome};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Least time given to a sink once the slot has run out.
const MIN_PUBLISH_TIME: Duration = Duration::from_millis(50);

/// Executes launch plans.
#[derive(Clone)]
pub struct TestRunner {
    prober: Arc<dyn Prober>,
    sink: Arc<dyn OutcomeSink>,
    clock: Arc<dyn Clock>,
    timing: SlotTiming,
}

impl TestRunner {
    /// Create a runner.
    pub fn new(
        prober: Arc<dyn Prober>,
        sink: Arc<dyn OutcomeSink>,
        clock: Arc<dyn Clock>,
        timing: SlotTiming,
    ) -> Self {
        Self {
            prober,
            sink,
            clock,
            timing,
        }
    }

    /// Run the probes for `plan` and publish each outcome.
    ///
    /// Returns the outcomes in the order they were produced.
    pub async fn run(&self, plan: &LaunchPlan) -> Vec<TestOutcome> {
        let mut outcomes = Vec::with_capacity(2);

        let result = with_timeout(
            plan.connect_timeout,
            self.prober.connectivity(&plan.partner, plan.connect_timeout),
        )
        .await;
        let connectivity = classify_connectivity(&self.context(plan), &result);
        tracing::info!(
            "Slot {}: connectivity to {} {}",
            plan.index,
            plan.partner,
            if connectivity.success { "ok" } else { "failed" }
        );
        let reachable = connectivity.success;
        self.publish(&connectivity, plan).await;
        outcomes.push(connectivity);

        if !reachable {
            return outcomes;
        }

        let result = match bandwidth_timeout(self.clock.now(), plan, &self.timing) {
            Some(timeout) => {
                with_timeout(
                    timeout,
                    self.prober
                        .bandwidth(&plan.partner, self.timing.probe_duration, timeout),
                )
                .await
            }
            None => Err(ProbeError::DeadlinePassed),
        };
        let bandwidth = classify_bandwidth(&self.context(plan), &result);
        match bandwidth.throughput_mbps() {
            Some(mbps) if bandwidth.success => {
                tracing::info!("Slot {}: bandwidth to {}: {:.2} Mbps", plan.index, plan.partner, mbps);
            }
            _ => {
                tracing::warn!("Slot {}: bandwidth to {} failed: {}", plan.index, plan.partner, bandwidth.raw);
            }
        }
        self.publish(&bandwidth, plan).await;
        outcomes.push(bandwidth);

        outcomes
    }

    fn context(&self, plan: &LaunchPlan) -> OutcomeContext {
        OutcomeContext {
            address: plan.partner.clone(),
            role: Role::Initiator,
            slot: Some(plan.index),
            timestamp_ms: self.clock.now_ms(),
        }
    }

    /// Publish within the time left in the slot, so a stuck sink cannot
    /// hold the run past its boundary.
    async fn publish(&self, outcome: &TestOutcome, plan: &LaunchPlan) {
        let limit = plan
            .slot_end
            .saturating_sub(self.clock.now())
            .max(MIN_PUBLISH_TIME);
        match tokio::time::timeout(limit, self.sink.publish(outcome)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!("Failed to publish {} outcome for {}: {}", outcome.kind, outcome.address, e);
            }
            Err(_) => {
                tracing::error!(
                    "Publishing {} outcome for {} timed out after {:?}, dropped",
                    outcome.kind,
                    outcome.address,
                    limit
                );
            }
        }
    }
}

impl std::fmt::Debug for TestRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestRunner")
            .field("clock", &self.clock)
            .field("timing", &self.timing)
            .finish_non_exhaustive()
    }
}

async fn with_timeout(limit: Duration, probe: impl Future<Output = ProbeResult>) -> ProbeResult {
    match tokio::time::timeout(limit, probe).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::TimedOut(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::probe::MockProber;
    use crate::publish::ChannelSink;
    use probe_core::INVALID_BANDWIDTH_JSON;
    use probe_types::{NodeAddr, ProbeKind};

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn plan(slot_end: Duration) -> LaunchPlan {
        LaunchPlan {
            epoch: 10,
            index: 2,
            partner: NodeAddr::new("10.19.30.103").unwrap(),
            connect_timeout: ms(200),
            window_end: slot_end - ms(3250),
            slot_end,
        }
    }

    fn runner(
        prober: &MockProber,
        clock: &MockClock,
    ) -> (TestRunner, tokio::sync::mpsc::Receiver<TestOutcome>) {
        let (sink, rx) = ChannelSink::new(8);
        let runner = TestRunner::new(
            Arc::new(prober.clone()),
            Arc::new(sink),
            Arc::new(clock.clone()),
            SlotTiming::default(),
        );
        (runner, rx)
    }

    const IPERF_OK: &str = r#"{"end": {"sum_received": {"bits_per_second": 50000000.0}}}"#;

    #[tokio::test]
    async fn successful_slot_publishes_both_outcomes() {
        let prober = MockProber::new();
        prober.script_bandwidth(Ok(IPERF_OK.into()), Duration::ZERO);
        let clock = MockClock::new(ms(35_010));
        let (runner, mut rx) = runner(&prober, &clock);

        let outcomes = runner.run(&plan(ms(38_500))).await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.success));
        assert_eq!(outcomes[1].throughput_mbps(), Some(50.0));

        assert_eq!(rx.recv().await.unwrap().kind, ProbeKind::Connectivity);
        assert_eq!(rx.recv().await.unwrap().kind, ProbeKind::Bandwidth);

        let calls = prober.calls();
        assert_eq!(calls[0].timeout, ms(200));
        // 3000 + 500 / 2, well inside the slot.
        assert_eq!(calls[1].timeout, ms(3250));
    }

    #[tokio::test]
    async fn failed_connectivity_skips_bandwidth() {
        let prober = MockProber::new();
        prober.script_connectivity(
            Err(ProbeError::Exit {
                code: Some(1),
                output: "100% packet loss".into(),
            }),
            Duration::ZERO,
        );
        let clock = MockClock::new(ms(35_010));
        let (runner, _rx) = runner(&prober, &clock);

        let outcomes = runner.run(&plan(ms(38_500))).await;

        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].success);
        assert_eq!(outcomes[0].raw, "100% packet loss");
        assert_eq!(prober.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_connectivity_probe_times_out() {
        let prober = MockProber::new();
        prober.script_connectivity(Ok("late".into()), Duration::from_secs(60));
        let clock = MockClock::new(ms(35_010));
        let (runner, _rx) = runner(&prober, &clock);

        let outcomes = runner.run(&plan(ms(38_500))).await;

        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].success);
        assert_eq!(outcomes[0].raw, "probe timed out after 200ms");
    }

    #[tokio::test(start_paused = true)]
    async fn bandwidth_timeout_is_capped_by_slot_end() {
        let prober = MockProber::new();
        prober.script_bandwidth(Ok(IPERF_OK.into()), Duration::from_secs(60));
        let clock = MockClock::new(ms(37_500));
        let (runner, _rx) = runner(&prober, &clock);

        let outcomes = runner.run(&plan(ms(38_500))).await;

        assert_eq!(prober.calls()[1].timeout, ms(1000));
        assert!(!outcomes[1].success);
        assert_eq!(outcomes[1].raw, "probe timed out after 1000ms");
    }

    #[tokio::test]
    async fn bandwidth_after_slot_end_is_deadline_passed() {
        let prober = MockProber::new();
        let clock = MockClock::new(ms(38_500));
        let (runner, _rx) = runner(&prober, &clock);

        let outcomes = runner.run(&plan(ms(38_500))).await;

        assert_eq!(prober.call_count(), 1);
        assert_eq!(outcomes[1].raw, "deadline passed");
        assert!(!outcomes[1].success);
    }

    #[tokio::test]
    async fn garbage_bandwidth_output_is_failure() {
        let prober = MockProber::new();
        prober.script_bandwidth(Ok("iperf3: interrupt".into()), Duration::ZERO);
        let clock = MockClock::new(ms(35_010));
        let (runner, _rx) = runner(&prober, &clock);

        let outcomes = runner.run(&plan(ms(38_500))).await;
        assert!(!outcomes[1].success);
        assert_eq!(outcomes[1].raw, INVALID_BANDWIDTH_JSON);
    }

    #[tokio::test]
    async fn closed_sink_does_not_stop_probes() {
        let prober = MockProber::new();
        let clock = MockClock::new(ms(35_010));
        let (runner, rx) = runner(&prober, &clock);
        drop(rx);

        let outcomes = runner.run(&plan(ms(38_500))).await;
        assert_eq!(outcomes.len(), 2);
    }

    #[derive(Debug)]
    struct StuckSink;

    #[async_trait::async_trait]
    impl OutcomeSink for StuckSink {
        async fn publish(&self, _outcome: &TestOutcome) -> crate::error::SinkResult<()> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_sink_does_not_hold_the_run() {
        let prober = MockProber::new();
        let runner = TestRunner::new(
            Arc::new(prober.clone()),
            Arc::new(StuckSink),
            Arc::new(MockClock::new(ms(35_010))),
            SlotTiming::default(),
        );

        let started = tokio::time::Instant::now();
        let outcomes = runner.run(&plan(ms(38_500))).await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(prober.call_count(), 2);
        // Each publish waits at most the 3490ms left in the slot.
        assert!(started.elapsed() < ms(2 * 3490 + 100));
    }
}
