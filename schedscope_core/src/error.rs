//! Unified error handling for schedscope
//!
//! One error type is shared by the run log, the supervisor, the store and
//! the playback layer so callers can match on a single enum.

use thiserror::Error;

/// Main error type for schedscope operations
#[derive(Debug, Error)]
pub enum ScopeError {
    /// I/O related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration parsing or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/Deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The scheduler process could not be spawned
    #[error("Launch of run '{run_id}' failed: {message}")]
    LaunchFailed { run_id: String, message: String },

    /// An append was attempted on a run whose log is already closed
    #[error("Run '{0}' is sealed and no longer accepts events")]
    RunSealed(String),

    /// A live subscriber was cut off
    #[error("Subscriber disconnected: {0}")]
    Disconnected(String),

    /// The operation needs a run that has ended
    #[error("Run '{0}' is still active")]
    RunActive(String),

    /// Too many runs are already active
    #[error("Run limit reached: {0}")]
    LimitReached(String),

    /// Resource not found errors
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid input/argument errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Generic internal errors (use sparingly)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Catch-all for other error types
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using ScopeError
pub type ScopeResult<T> = Result<T, ScopeError>;

impl From<serde_json::Error> for ScopeError {
    fn from(err: serde_json::Error) -> Self {
        ScopeError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for ScopeError {
    fn from(err: toml::de::Error) -> Self {
        ScopeError::Config(format!("TOML parse error: {}", err))
    }
}

impl From<serde_yaml::Error> for ScopeError {
    fn from(err: serde_yaml::Error) -> Self {
        ScopeError::Serialization(format!("YAML error: {}", err))
    }
}

impl From<uuid::Error> for ScopeError {
    fn from(err: uuid::Error) -> Self {
        ScopeError::InvalidInput(format!("UUID error: {}", err))
    }
}

impl From<anyhow::Error> for ScopeError {
    fn from(err: anyhow::Error) -> Self {
        ScopeError::Other(err.to_string())
    }
}

impl From<&str> for ScopeError {
    fn from(msg: &str) -> Self {
        ScopeError::Other(msg.to_string())
    }
}

impl From<String> for ScopeError {
    fn from(msg: String) -> Self {
        ScopeError::Other(msg)
    }
}

// Helper methods
impl ScopeError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(msg: S) -> Self {
        ScopeError::Config(msg.into())
    }

    /// Create a launch failure for a run
    pub fn launch_failed<S: Into<String>, T: Into<String>>(run_id: S, message: T) -> Self {
        ScopeError::LaunchFailed {
            run_id: run_id.into(),
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        ScopeError::NotFound(resource.into())
    }

    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        ScopeError::InvalidInput(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        ScopeError::Internal(msg.into())
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, ScopeError::NotFound(_))
    }

    /// Check if this error came from a failed process launch
    pub fn is_launch_failure(&self) -> bool {
        matches!(self, ScopeError::LaunchFailed { .. })
    }

    pub fn is_invalid_input(&self) -> bool {
        matches!(self, ScopeError::InvalidInput(_))
    }
}
