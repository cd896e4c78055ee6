//! Mock prober for testing.
//!
//! Allows scripting probe results and delays, and records every call for
//! verification.

use super::{BandwidthServer, Prober};
use async_trait::async_trait;
use probe_core::ProbeResult;
use probe_types::{NodeAddr, ProbeKind};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A recorded probe call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeCall {
    /// Which probe was called.
    pub kind: ProbeKind,
    /// Target address.
    pub addr: NodeAddr,
    /// Timeout passed by the caller.
    pub timeout: Duration,
}

#[derive(Debug)]
struct Scripted {
    result: ProbeResult,
    delay: Duration,
}

#[derive(Debug, Default)]
struct MockProberInner {
    calls: Vec<ProbeCall>,
    connectivity: VecDeque<Scripted>,
    bandwidth: VecDeque<Scripted>,
    served: VecDeque<Scripted>,
}

/// Mock prober and bandwidth server.
///
/// Unscripted calls succeed immediately with empty output (connectivity)
/// or an empty JSON object (bandwidth). Unscripted `serve_once` calls
/// never return.
#[derive(Debug, Default, Clone)]
pub struct MockProber {
    inner: Arc<Mutex<MockProberInner>>,
}

impl MockProber {
    /// Create a new mock prober.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockProberInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a connectivity result, returned after `delay`.
    pub fn script_connectivity(&self, result: ProbeResult, delay: Duration) {
        self.lock().connectivity.push_back(Scripted { result, delay });
    }

    /// Queue a bandwidth result, returned after `delay`.
    pub fn script_bandwidth(&self, result: ProbeResult, delay: Duration) {
        self.lock().bandwidth.push_back(Scripted { result, delay });
    }

    /// Queue a server run result, returned after `delay`.
    pub fn script_serve(&self, result: ProbeResult, delay: Duration) {
        self.lock().served.push_back(Scripted { result, delay });
    }

    /// All client-side calls so far.
    pub fn calls(&self) -> Vec<ProbeCall> {
        self.lock().calls.clone()
    }

    /// Number of client-side calls so far.
    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    async fn answer(&self, call: ProbeCall, default: &str) -> ProbeResult {
        let scripted = {
            let mut inner = self.lock();
            let queue = match call.kind {
                ProbeKind::Connectivity => &mut inner.connectivity,
                ProbeKind::Bandwidth => &mut inner.bandwidth,
            };
            let next = queue.pop_front();
            inner.calls.push(call);
            next
        };

        match scripted {
            Some(Scripted { result, delay }) => {
                tokio::time::sleep(delay).await;
                result
            }
            None => Ok(default.to_string()),
        }
    }
}

#[async_trait]
impl Prober for MockProber {
    async fn connectivity(&self, addr: &NodeAddr, timeout: Duration) -> ProbeResult {
        let call = ProbeCall {
            kind: ProbeKind::Connectivity,
            addr: addr.clone(),
            timeout,
        };
        self.answer(call, "").await
    }

    async fn bandwidth(&self, addr: &NodeAddr, _duration: Duration, timeout: Duration) -> ProbeResult {
        let call = ProbeCall {
            kind: ProbeKind::Bandwidth,
            addr: addr.clone(),
            timeout,
        };
        self.answer(call, "{}").await
    }
}

#[async_trait]
impl BandwidthServer for MockProber {
    async fn serve_once(&self) -> ProbeResult {
        let scripted = self.lock().served.pop_front();
        match scripted {
            Some(Scripted { result, delay }) => {
                tokio::time::sleep(delay).await;
                result
            }
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use probe_core::ProbeError;

    fn addr(s: &str) -> NodeAddr {
        NodeAddr::new(s).unwrap()
    }

    #[tokio::test]
    async fn unscripted_calls_succeed_and_are_recorded() {
        let mock = MockProber::new();
        let secs = Duration::from_secs(1);

        assert_eq!(mock.connectivity(&addr("b"), secs).await, Ok(String::new()));
        assert_eq!(mock.bandwidth(&addr("b"), secs, secs).await, Ok("{}".into()));

        let calls = mock.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].kind, ProbeKind::Connectivity);
        assert_eq!(calls[1].kind, ProbeKind::Bandwidth);
    }

    #[tokio::test]
    async fn scripted_results_are_returned_in_order() {
        let mock = MockProber::new();
        mock.script_connectivity(Err(ProbeError::Spawn("boom".into())), Duration::ZERO);
        mock.script_connectivity(Ok("pong".into()), Duration::ZERO);

        let secs = Duration::from_secs(1);
        assert!(mock.connectivity(&addr("b"), secs).await.is_err());
        assert_eq!(mock.connectivity(&addr("b"), secs).await, Ok("pong".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn clones_share_script_and_calls() {
        let mock = MockProber::new();
        let clone = mock.clone();
        clone.script_serve(Ok("served".into()), Duration::from_millis(5));

        assert_eq!(mock.serve_once().await, Ok("served".into()));
        clone.connectivity(&addr("c"), Duration::from_secs(1)).await.unwrap();
        assert_eq!(mock.call_count(), 1);
    }
}
