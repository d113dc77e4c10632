//! Error types for the deploy pipeline.

use thiserror::Error;

use serpens_state::Conflict;

use crate::coordinator::Stage;

pub type FetchResult<T> = Result<T, FetchError>;

/// Errors fetching a service config.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned {status}")]
    Status { url: String, status: u16 },

    #[error("no config for {repository}/{service}")]
    NotFound { repository: String, service: String },

    #[error("invalid name in config path: {0}")]
    InvalidName(String),
}

/// Why a pipeline run ended early.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Signature or allow-list rejection. Nothing was touched.
    #[error("not authorized: {0}")]
    Auth(String),

    /// The config broke platform rules. Nothing was touched.
    #[error("config rejected with {} violation(s)", .0.len())]
    Validation(Vec<String>),

    /// The domain or port belongs to another service. Nothing was touched.
    #[error("allocation conflict: {}", join(.0))]
    Conflict(Vec<Conflict>),

    /// A fetch, orchestrator, file or reload failure at `stage`.
    #[error("{stage} failed: {reason}")]
    External { stage: Stage, reason: String },
}

impl DeployError {
    pub fn external(stage: Stage, err: impl std::fmt::Display) -> Self {
        Self::External {
            stage,
            reason: err.to_string(),
        }
    }
}

fn join(conflicts: &[Conflict]) -> String {
    conflicts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
