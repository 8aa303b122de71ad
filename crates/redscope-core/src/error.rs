//! Error types for Redscope

use thiserror::Error;

/// Core error type for Redscope operations
#[derive(Error, Debug)]
pub enum RedscopeError {
    /// Connection could not be established or was lost (unreachable host,
    /// authentication rejected, TLS failure, wrong topology)
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    /// The server replied with an error to a command
    #[error("Command error: {0}")]
    Command(String),

    #[error("Invalid client metadata: {0}")]
    InvalidClientMetadata(String),

    /// An internal pool invariant was violated
    #[error("Pool consistency error: {0}")]
    PoolConsistency(String),

    /// Illegal bulk action state transition
    #[error("Bulk action lifecycle error: {0}")]
    BulkActionLifecycle(String),

    #[error("Already exists: {0}")]
    Duplicate(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl RedscopeError {
    /// Returns true for errors that mean the underlying connection is unusable
    pub fn is_connection_error(&self) -> bool {
        matches!(self, RedscopeError::Connection(_))
    }
}

/// Result type alias for Redscope operations
pub type Result<T> = std::result::Result<T, RedscopeError>;
