//! Error types for planlog operations

use std::path::PathBuf;

/// Result type for planlog operations
pub type Result<T> = std::result::Result<T, PlanlogError>;

/// Error types for the log, tailing and rebuilding layers
#[derive(Debug, thiserror::Error)]
pub enum PlanlogError {
    /// A frame or the prologue was cut short.
    ///
    /// Recoverable when tailing a live file (wait for more bytes), fatal when
    /// the file is known to be complete.
    #[error("Truncated data: expected {expected} bytes, {available} available")]
    Truncated { expected: usize, available: usize },

    /// Bad magic, unparseable header or oversized frame
    #[error("Invalid log format: {0}")]
    InvalidFormat(String),

    /// Log format version differs from the one this build reads
    #[error(
        "Unsupported log format version {found} (this build reads version {expected}); \
         convert the file offline before opening it"
    )]
    UnsupportedVersion { found: u32, expected: u32 },

    /// Sampled index validation failed. Handled internally by rebuilding.
    #[error("Index inconsistent with event file: {0}")]
    IndexInconsistent(String),

    /// A single record handler failed
    #[error("Failed to dispatch '{method}': {message}")]
    RecordDispatch { method: String, message: String },

    /// Socket read/write failure on one connection
    #[error("Transport error: {0}")]
    Transport(String),

    /// The event file to serve or open does not exist
    #[error("Log file not found: {}", .0.display())]
    SourceMissing(PathBuf),

    /// Seek past the last indexed cycle
    #[error("Cycle {requested} is not indexed ({available} cycles available)")]
    CycleOutOfRange { requested: usize, available: usize },

    /// A remote reference could not be resolved to a local proxy
    #[error("Invalid object reference: {0}")]
    InvalidReference(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl PlanlogError {
    /// Whether more bytes could turn this error into a successful read
    pub fn is_truncated(&self) -> bool {
        matches!(self, PlanlogError::Truncated { .. })
    }

    pub(crate) fn dispatch(method: impl Into<String>, message: impl ToString) -> Self {
        PlanlogError::RecordDispatch {
            method: method.into(),
            message: message.to_string(),
        }
    }
}

impl From<String> for PlanlogError {
    fn from(s: String) -> Self {
        PlanlogError::Other(s)
    }
}

impl From<&str> for PlanlogError {
    fn from(s: &str) -> Self {
        PlanlogError::Other(s.to_string())
    }
}
