//! Write boundary to the remote time-series store

pub mod influx;
pub mod memory;

pub use influx::InfluxSink;
pub use memory::{InjectedFailure, MemorySink};

use async_trait::async_trait;

use crate::error::Result;
use crate::point::MetricPoint;

/// Generic trait for metric store backends.
///
/// The writer only consumes success/failure and the transient-vs-fatal
/// classification carried by the error; nothing else crosses this boundary.
#[async_trait]
pub trait MetricSink: Send + Sync + 'static {
    /// Write a batch of points in one request. All-or-nothing: any error
    /// applies to the whole batch.
    async fn write_points(&self, points: &[MetricPoint]) -> Result<()>;

    /// Check the store is reachable
    async fn ping(&self) -> Result<()>;

    /// Get a name for this sink
    fn name(&self) -> &str;
}
