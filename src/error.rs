// src/error.rs
use thiserror::Error;

/// Result alias used throughout the sysflux library
pub type Result<T, E = AgentError> = std::result::Result<T, E>;

/// Custom Error type for the sysflux agent
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Init error: {0}")]
    Init(String),

    #[error("Collection error: {0}")]
    Collection(String),

    #[error("Transient write error: {0}")]
    WriteTransient(String),

    #[error("Fatal write error: {0}")]
    WriteFatal(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl AgentError {
    /// Whether a failed write attempt is worth retrying.
    ///
    /// Everything that is not an explicit rejection of the payload is
    /// treated as transient; retry cannot fix a malformed point.
    pub fn is_transient_write(&self) -> bool {
        !matches!(self, AgentError::WriteFatal(_) | AgentError::Config(_))
    }
}
