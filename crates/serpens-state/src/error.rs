//! Error types for config-file state.

use thiserror::Error;

/// Result type alias for state operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur while reading or mutating a config file.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("backup error: {0}")]
    Backup(String),

    #[error("restore error: {0}")]
    Restore(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("proxy reload failed: {0}")]
    Reload(String),

    #[error("port {port} is already registered to {owner}")]
    PortTaken { port: u16, owner: String },
}
