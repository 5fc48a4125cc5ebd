//! In-memory sink for testing and dry runs

use async_trait::async_trait;
use log::info;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{AgentError, Result};
use crate::point::{MetricPoint, batch_to_line_protocol};
use crate::sink::MetricSink;

/// Failure to inject on the next write attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    Transient,
    Fatal,
}

/// Stores points in memory; tests can script failures, dry runs log instead
/// of storing.
pub struct MemorySink {
    points: Mutex<Vec<MetricPoint>>,
    failures: Mutex<VecDeque<InjectedFailure>>,
    attempts: AtomicUsize,
    /// Log line protocol and discard instead of accumulating
    discard: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            points: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            attempts: AtomicUsize::new(0),
            discard: false,
        }
    }

    /// A sink for `--dry-run`: prints what would have been written
    pub fn for_dry_run() -> Self {
        Self {
            discard: true,
            ..Self::new()
        }
    }

    /// Script `count` consecutive failures for upcoming write attempts
    pub fn fail_next(&self, failure: InjectedFailure, count: usize) {
        let mut failures = self.failures.lock().expect("failure queue lock");
        for _ in 0..count {
            failures.push_back(failure);
        }
    }

    /// All points successfully written so far
    pub fn points(&self) -> Vec<MetricPoint> {
        self.points.lock().expect("point store lock").clone()
    }

    /// Total write attempts, including failed ones
    pub fn write_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricSink for MemorySink {
    async fn write_points(&self, points: &[MetricPoint]) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(failure) = self.failures.lock().expect("failure queue lock").pop_front() {
            return Err(match failure {
                InjectedFailure::Transient => {
                    AgentError::WriteTransient("injected transient failure".to_string())
                }
                InjectedFailure::Fatal => {
                    AgentError::WriteFatal("injected fatal failure".to_string())
                }
            });
        }

        if let Some(invalid) = points.iter().find(|p| !p.is_valid()) {
            return Err(AgentError::WriteFatal(format!(
                "Point '{}' has no fields",
                invalid.name
            )));
        }

        if self.discard {
            info!("dry-run write:\n{}", batch_to_line_protocol(points));
        } else {
            self.points
                .lock()
                .expect("point store lock")
                .extend_from_slice(points);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn point() -> MetricPoint {
        MetricPoint::new("cpu", Utc::now()).with_field("value", 1.0)
    }

    #[tokio::test]
    async fn test_stores_points() {
        let sink = MemorySink::new();
        sink.write_points(&[point(), point()]).await.unwrap();
        assert_eq!(sink.points().len(), 2);
        assert_eq!(sink.write_attempts(), 1);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed_in_order() {
        let sink = MemorySink::new();
        sink.fail_next(InjectedFailure::Transient, 1);
        sink.fail_next(InjectedFailure::Fatal, 1);

        assert!(matches!(
            sink.write_points(&[point()]).await,
            Err(AgentError::WriteTransient(_))
        ));
        assert!(matches!(
            sink.write_points(&[point()]).await,
            Err(AgentError::WriteFatal(_))
        ));
        sink.write_points(&[point()]).await.unwrap();
        assert_eq!(sink.points().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_point_is_fatal() {
        let sink = MemorySink::new();
        let empty = MetricPoint::new("cpu", Utc::now());
        assert!(matches!(
            sink.write_points(&[empty]).await,
            Err(AgentError::WriteFatal(_))
        ));
    }
}
