use thiserror::Error;

/// Node-level errors. These are recovered locally by the retry loop before
/// they ever escalate to the execution level.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("No effect executor registered for action: {0}")]
    ExecutorNotFound(String),
    #[error("Execution error: {0}")]
    ExecutionFailed(String),
    #[error("Timeout: node execution exceeded time limit")]
    Timeout,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl NodeError {
    /// Node-level timeouts are recorded with a distinguishable error kind.
    pub fn is_timeout(&self) -> bool {
        matches!(self, NodeError::Timeout)
    }
}
