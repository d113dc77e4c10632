//! Error types for stack deployment.

use thiserror::Error;

pub type StackResult<T> = Result<T, StackError>;

#[derive(Debug, Error)]
pub enum StackError {
    #[error("orchestrator rejected stack {name}: {reason}")]
    Rejected { name: String, reason: String },

    #[error("failed to run {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("unexpected orchestrator output: {0}")]
    Parse(String),
}
