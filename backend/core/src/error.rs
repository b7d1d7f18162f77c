use thiserror::Error;

/// Top-level error type for the Gatehouse runtime.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("provider error ({provider}): {message}")]
    Provider { provider: String, message: String },

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool execution failed: {0}")]
    ExecutionFailed(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("malformed message payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GateError {
    /// Wrap a collaborator failure coming back from a `Store` call.
    pub fn storage(err: impl std::fmt::Display) -> Self {
        GateError::Storage(err.to_string())
    }
}
