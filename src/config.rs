use config::{self, File};
use log::{debug, error};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{AgentError, Result};
use crate::retry::RetryConfig;

/// InfluxDB connection configuration
#[derive(Debug, Deserialize, Clone)]
pub struct InfluxConfig {
    /// Database host
    #[serde(default = "default_host")]
    pub host: String,
    /// Database port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Database name
    pub database: String,
    /// Username, if the server requires authentication
    #[serde(default)]
    pub username: Option<String>,
    /// Password, if the server requires authentication
    #[serde(default)]
    pub password: Option<String>,
    /// Use HTTPS instead of HTTP
    #[serde(default)]
    pub https: bool,
    /// Per-attempt write timeout in seconds
    #[serde(default = "default_write_timeout")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8086
}

fn default_write_timeout() -> u64 {
    10
}

impl InfluxConfig {
    /// Base URL for the HTTP API
    pub fn base_url(&self) -> String {
        let scheme = if self.https { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Writer cadence and batching configuration
#[derive(Debug, Deserialize, Clone)]
pub struct WriterConfig {
    /// How often the buffer is drained and written, in seconds
    #[serde(default = "default_write_interval")]
    pub interval_secs: u64,
    /// Maximum points per write request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Retry behaviour for transient write failures
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_write_interval() -> u64 {
    1
}

fn default_batch_size() -> usize {
    1000
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_write_interval(),
            batch_size: default_batch_size(),
            retry: RetryConfig::default(),
        }
    }
}

impl WriterConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    /// Batch size ceiling; a configured zero would drain nothing forever
    pub fn batch_size(&self) -> usize {
        self.batch_size.max(1)
    }
}

/// Point buffer configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BufferConfig {
    /// Maximum buffered points before the oldest are evicted
    #[serde(default = "default_buffer_capacity")]
    pub capacity: usize,
}

fn default_buffer_capacity() -> usize {
    10_000
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: default_buffer_capacity(),
        }
    }
}

/// One configured metric module
#[derive(Debug, Deserialize, Clone)]
pub struct ModuleDescriptor {
    /// Instance name, unique within the agent
    pub name: String,
    /// Module type; defaults to the instance name, so `name = "cpu"` is enough
    /// for built-ins
    #[serde(default)]
    pub module: Option<String>,
    /// Collection interval in seconds, must be non-zero
    #[serde(default = "default_module_interval")]
    pub interval_secs: u64,
    /// Whether the module is scheduled at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Invocation time budget in seconds; defaults to half the interval
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Opaque options passed through to the module constructor
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,
}

fn default_module_interval() -> u64 {
    10
}

fn default_enabled() -> bool {
    true
}

impl ModuleDescriptor {
    /// Module type name, falling back to the instance name
    pub fn module_type(&self) -> &str {
        self.module.as_deref().unwrap_or(&self.name)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Invocation time budget: configured value, or half the interval with a
    /// one second floor
    pub fn timeout(&self) -> Duration {
        match self.timeout_secs {
            Some(secs) => Duration::from_secs(secs.max(1)),
            None => Duration::from_secs((self.interval_secs / 2).max(1)),
        }
    }

    /// Validate the descriptor shape; module-specific options are validated by
    /// the module constructor
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(AgentError::Config("Module name must not be empty".to_string()));
        }
        if self.interval_secs == 0 {
            return Err(AgentError::Config(format!(
                "Module '{}' has a zero interval",
                self.name
            )));
        }
        if let Some(0) = self.timeout_secs {
            return Err(AgentError::Config(format!(
                "Module '{}' has a zero timeout",
                self.name
            )));
        }
        Ok(())
    }
}

/// Logging level
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level
    Info,
    /// Debug level
    Debug,
    /// Trace level
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

/// Agent configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    /// InfluxDB connection configuration
    pub influx: InfluxConfig,
    /// Writer cadence and batching
    #[serde(default)]
    pub writer: WriterConfig,
    /// Point buffer sizing
    #[serde(default)]
    pub buffer: BufferConfig,
    /// Configured metric modules
    #[serde(default)]
    pub modules: Vec<ModuleDescriptor>,
    /// Logging level
    #[serde(default)]
    pub log_level: LogLevel,
}

impl AgentConfig {
    /// Validate descriptor shapes and instance-name uniqueness
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for descriptor in &self.modules {
            descriptor.validate()?;
            if !seen.insert(descriptor.name.as_str()) {
                return Err(AgentError::Config(format!(
                    "Duplicate module name '{}'",
                    descriptor.name
                )));
            }
        }
        Ok(())
    }
}

/// Load agent configuration from a file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AgentConfig> {
    let path = path.as_ref();
    debug!("Loading configuration from {}", path.display());

    if !path.exists() {
        error!("Configuration file {} does not exist", path.display());
        return Err(AgentError::Config(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let extension = match path.extension() {
        Some(ext) => ext.to_string_lossy().to_lowercase(),
        None => {
            return Err(AgentError::Config(format!(
                "Configuration file has no extension: {}",
                path.display()
            )));
        }
    };

    let format = match extension.as_str() {
        "toml" => config::FileFormat::Toml,
        "json" => config::FileFormat::Json,
        "yaml" | "yml" => config::FileFormat::Yaml,
        format => {
            return Err(AgentError::Config(format!(
                "Unsupported config format: {}",
                format
            )));
        }
    };

    let settings = config::Config::builder()
        .add_source(File::with_name(&path.to_string_lossy()).format(format))
        .build()
        .map_err(|e| AgentError::Config(e.to_string()))?;

    // Descriptor problems are not fatal here: the registry disables the
    // offending module at build time. `validate` stays available for callers
    // that want strict up-front checking.
    settings
        .try_deserialize()
        .map_err(|e| AgentError::Config(e.to_string()))
}
