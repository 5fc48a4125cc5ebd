//! Batched writer: drains the buffer on a cadence and ships batches to a sink
//!
//! Retry handling lives here, not in the sink: transient failures back off
//! and retry up to the configured ceiling, fatal ones drop the batch
//! immediately. Either way the terminal outcome is reported exactly once.

use log::{debug, error, info, trace};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::buffer::PointBuffer;
use crate::config::WriterConfig;
use crate::error::AgentError;
use crate::retry::execute_with_retry;
use crate::sink::MetricSink;

/// How long the final flush may run before giving up on remaining batches
const FINAL_FLUSH_BUDGET: Duration = Duration::from_secs(10);

/// Outcome of writing one batch
#[derive(Debug)]
pub struct WriteOutcome {
    pub points: usize,
    pub error: Option<AgentError>,
}

pub struct Writer<S: MetricSink> {
    sink: Arc<S>,
    buffer: Arc<PointBuffer>,
    config: WriterConfig,
}

impl<S: MetricSink> Writer<S> {
    pub fn new(sink: Arc<S>, buffer: Arc<PointBuffer>, config: WriterConfig) -> Self {
        Self {
            sink,
            buffer,
            config,
        }
    }

    /// Run the drain loop until `shutdown` flips to true, then attempt a final
    /// flush of whatever remains. Returns false when the final flush could not
    /// deliver everything.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> bool {
        // First drain happens one cadence after start, not immediately
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.interval(),
            self.config.interval(),
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Writer running against sink '{}' every {:?}",
            self.sink.name(),
            self.config.interval()
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.buffer.dropped_since_last_report();
                    self.drain_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let flushed = self.final_flush().await;
        info!("Writer stopped");
        flushed
    }

    /// Drain and write one cadence worth of batches
    async fn drain_once(&self) {
        loop {
            let batch = self.buffer.drain(self.config.batch_size());
            if batch.is_empty() {
                return;
            }
            let full = batch.len() == self.config.batch_size();
            let outcome = self.write_batch(&batch).await;
            if let Some(error) = outcome.error {
                error!("Discarded a batch of {} points: {}", outcome.points, error);
            } else {
                trace!("Wrote {} points", outcome.points);
            }
            // A partial batch means the buffer is drained for this cycle
            if !full {
                return;
            }
        }
    }

    /// Write one batch with retry. Transient failures retry with backoff,
    /// fatal ones short-circuit; the returned outcome carries the terminal
    /// error, if any.
    async fn write_batch(&self, batch: &[crate::point::MetricPoint]) -> WriteOutcome {
        let result = execute_with_retry(
            || self.sink.write_points(batch),
            &self.config.retry,
            AgentError::is_transient_write,
            "Batch write",
        )
        .await;

        WriteOutcome {
            points: batch.len(),
            error: result.err(),
        }
    }

    /// Best-effort flush at shutdown: one attempt per batch, no retry loop,
    /// bounded overall so a dead sink cannot hold the process open.
    async fn final_flush(&self) -> bool {
        self.buffer.dropped_since_last_report();
        if self.buffer.is_empty() {
            return true;
        }

        let remaining = self.buffer.len();
        info!("Flushing {} buffered points before exit", remaining);

        let flush = async {
            loop {
                let batch = self.buffer.drain(self.config.batch_size());
                if batch.is_empty() {
                    return true;
                }
                if let Err(e) = self.sink.write_points(&batch).await {
                    error!(
                        "Final flush abandoned {} points ({} still buffered): {}",
                        batch.len(),
                        self.buffer.len(),
                        e
                    );
                    return false;
                }
                debug!("Final flush wrote {} points", batch.len());
            }
        };

        match tokio::time::timeout(FINAL_FLUSH_BUDGET, flush).await {
            Ok(flushed) => flushed,
            Err(_) => {
                error!(
                    "Final flush exceeded {:?}; {} points abandoned",
                    FINAL_FLUSH_BUDGET,
                    self.buffer.len()
                );
                false
            }
        }
    }
}
