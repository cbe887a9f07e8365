use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the flotilla supervisor
#[derive(Debug, Error)]
pub enum FlotillaError {
    // Spec store errors
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Lifecycle errors
    #[error("Failed to launch {0}: {1}")]
    Launch(String, String),

    #[error("Process not found: {0}")]
    NotFound(String),

    #[error("Process {0} exited unexpectedly: {1}")]
    RuntimeCrash(String, String),

    #[error("Memory limit exceeded for process {0}: {1} bytes (limit: {2} bytes)")]
    MemoryExceeded(String, u64, u64),

    #[error("Signal error: {0}")]
    SignalError(String),

    // Log capture errors
    #[error("Log error: {0}")]
    LogError(String),

    // IPC errors
    #[error("IPC error: {0}")]
    IpcError(String),

    #[error("Failed to connect to daemon: {0}")]
    ConnectionError(String),

    #[error("IPC protocol error: {0}")]
    ProtocolError(String),

    #[error("Daemon not running")]
    DaemonNotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("{0}")]
    Other(String),
}

impl FlotillaError {
    /// Coarse category reported to the operator for per-name failures
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlotillaError::Validation(_) | FlotillaError::ConfigError(_) => ErrorKind::Validation,
            FlotillaError::Launch(..) | FlotillaError::LogError(_) => ErrorKind::Launch,
            FlotillaError::NotFound(_) => ErrorKind::NotFound,
            FlotillaError::RuntimeCrash(..) => ErrorKind::RuntimeCrash,
            FlotillaError::MemoryExceeded(..) => ErrorKind::MemoryExceeded,
            _ => ErrorKind::Internal,
        }
    }
}

/// Error categories carried over IPC in batch reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Validation,
    Launch,
    NotFound,
    RuntimeCrash,
    MemoryExceeded,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "ValidationError"),
            ErrorKind::Launch => write!(f, "LaunchError"),
            ErrorKind::NotFound => write!(f, "NotFoundError"),
            ErrorKind::RuntimeCrash => write!(f, "RuntimeCrash"),
            ErrorKind::MemoryExceeded => write!(f, "MemoryExceeded"),
            ErrorKind::Internal => write!(f, "InternalError"),
        }
    }
}

/// Result type alias for flotilla operations
pub type Result<T> = std::result::Result<T, FlotillaError>;
