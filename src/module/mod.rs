//! Metric module capability and the built-in module set

mod cpu;
mod disk;
mod diskio;
mod exec;
mod gpu;
mod memory;
mod netio;
mod sensors;
mod system;

pub use cpu::CpuModule;
pub use disk::DiskModule;
pub use diskio::DiskIoModule;
pub use exec::ExecModule;
pub use gpu::GpuModule;
pub use memory::MemoryModule;
pub use netio::NetIoModule;
pub use sensors::SensorsModule;
pub use system::SystemModule;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

use crate::config::ModuleDescriptor;
use crate::error::{AgentError, Result};
use crate::point::MetricPoint;

/// The single capability every metric module exposes: produce zero or more
/// points for the current instant, or fail.
///
/// Built-in and user-registered modules satisfy the same trait, so the
/// scheduler is agnostic to provenance. A module owns whatever state it needs
/// between invocations (previous counters for rate computation, open
/// handles); the scheduler guarantees invocations of one instance never
/// overlap.
#[async_trait::async_trait]
pub trait MetricModule: Send + Sync {
    /// Instance name, used for tagging and diagnostics
    fn name(&self) -> &str;

    /// Produce points for the current cycle. `now` is the invocation start
    /// and is the timestamp most modules should stamp on their points.
    async fn collect(&mut self, now: DateTime<Utc>) -> Result<Vec<MetricPoint>>;
}

/// Deserialize a descriptor's opaque option block into a module's own
/// options struct. A shape mismatch is a configuration error.
pub fn parse_options<T>(descriptor: &ModuleDescriptor) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if descriptor.options.is_empty() {
        return Ok(T::default());
    }

    let value = serde_json::to_value(&descriptor.options)
        .map_err(|e| AgentError::Config(format!("Module '{}': {}", descriptor.name, e)))?;
    serde_json::from_value(value).map_err(|e| {
        AgentError::Config(format!(
            "Module '{}' has invalid options: {}",
            descriptor.name, e
        ))
    })
}
