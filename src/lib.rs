//! A system-metrics collection agent for InfluxDB

pub mod agent;
pub mod buffer;
pub mod config;
pub mod error;
pub mod module;
pub mod point;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod sink;
pub mod util;
pub mod writer;

/// Re-export of commonly used types for convenience
pub mod prelude {
    pub use crate::agent::{Agent, AgentHandle, AgentState};
    pub use crate::buffer::PointBuffer;
    pub use crate::config::{AgentConfig, ModuleDescriptor, load_config};
    pub use crate::error::{AgentError, Result};
    pub use crate::module::MetricModule;
    pub use crate::point::{FieldValue, MetricPoint};
    pub use crate::registry::ModuleRegistry;
    pub use crate::retry::RetryConfig;
    pub use crate::sink::MetricSink;
}

pub use util::logging::init as init_logging;

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
