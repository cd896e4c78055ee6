//! Outcome publication.
//!
//! Every completed probe produces one [`TestOutcome`]. Sinks receive them in
//! completion order. A failed publish is logged by the caller and the
//! outcome is dropped; it never affects the schedule.

use crate::config::{OutputConfig, OutputKind};
use crate::error::{SinkError, SinkResult};
use async_trait::async_trait;
use probe_types::TestOutcome;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};

/// Destination for test outcomes.
#[async_trait]
pub trait OutcomeSink: Send + Sync {
    /// Publish one outcome.
    async fn publish(&self, outcome: &TestOutcome) -> SinkResult<()>;
}

/// Writes one JSON object per line.
pub struct JsonLinesSink {
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl JsonLinesSink {
    /// Wrap an arbitrary writer.
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
        }
    }

    /// Write to standard output.
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }

    /// Append to `path`, creating it if needed.
    pub async fn append_file(path: &Path) -> SinkResult<Self> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self::new(file))
    }
}

impl std::fmt::Debug for JsonLinesSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesSink").finish_non_exhaustive()
    }
}

#[async_trait]
impl OutcomeSink for JsonLinesSink {
    async fn publish(&self, outcome: &TestOutcome) -> SinkResult<()> {
        let mut line = serde_json::to_vec(outcome)?;
        line.push(b'\n');

        // Hold the lock across write and flush so lines never interleave.
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Forwards outcomes to an in-process channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<TestOutcome>,
}

impl ChannelSink {
    /// Create a sink and the receiver for its outcomes.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TestOutcome>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl OutcomeSink for ChannelSink {
    async fn publish(&self, outcome: &TestOutcome) -> SinkResult<()> {
        self.tx.send(outcome.clone()).await.map_err(|_| SinkError::Closed)
    }
}

/// Build the configured sink.
///
/// # Errors
///
/// Returns an error if the output file cannot be opened.
pub async fn sink_from_config(config: &OutputConfig) -> SinkResult<Arc<dyn OutcomeSink>> {
    match (config.kind, &config.path) {
        (OutputKind::File, Some(path)) => Ok(Arc::new(JsonLinesSink::append_file(path).await?)),
        (OutputKind::File, None) => Err(SinkError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "output.path is required for kind = \"file\"",
        ))),
        (OutputKind::Stdout, _) => Ok(Arc::new(JsonLinesSink::stdout())),
    }
}
