use thiserror::Error;

/// Errors that end a swarm invocation or a storage operation.
#[derive(Error, Debug)]
pub enum SwarmError {
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Invalid swarm configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Step limit of {limit} exceeded, last active agent: {agent}")]
    StepLimitExceeded { limit: usize, agent: String },

    #[error("Invalid arguments for tool '{tool}': {message}")]
    InvalidToolArguments { tool: String, message: String },

    #[error("Tool '{tool}' failed: {message}")]
    ToolFailed { tool: String, message: String },

    #[error("Upstream unavailable: {0}")]
    Upstream(String),

    #[error("Unusable model output: {0}")]
    ModelOutput(String),

    #[error("Turn timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Thread not found: {0}")]
    ThreadNotFound(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Context error: {0}")]
    ContextError(String),
}

impl SwarmError {
    /// Only transient upstream failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SwarmError::Upstream(_))
    }
}

impl From<serde_json::Error> for SwarmError {
    fn from(e: serde_json::Error) -> Self {
        SwarmError::ContextError(e.to_string())
    }
}

/// Errors a tool reports back to the router.
///
/// `NotFound` and `PreconditionFailed` are fed to the agent as tool results so it can
/// react conversationally. The other variants abort the invocation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    PreconditionFailed(String),

    #[error("{0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Failed(String),
}

pub type Result<T> = std::result::Result<T, SwarmError>;
