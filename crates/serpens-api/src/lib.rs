//! serpens-api — HTTP surface of the deployment daemon.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/webhook/deploy` | Signed deploy webhook; starts the pipeline in the background |
//! | GET | `/serpens/allocations` | Taken domains and ports |
//! | GET | `/health` | Liveness |

pub mod handlers;
pub mod signature;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use serpens_deploy::DeployCoordinator;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub coordinator: Arc<DeployCoordinator>,
    /// Webhook HMAC key. Empty rejects every webhook.
    pub secret: Arc<[u8]>,
}

impl ApiState {
    pub fn new(coordinator: Arc<DeployCoordinator>, secret: impl Into<Vec<u8>>) -> Self {
        let secret: Vec<u8> = secret.into();
        Self {
            coordinator,
            secret: secret.into(),
        }
    }
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/webhook/deploy", post(handlers::deploy_webhook))
        .route("/serpens/allocations", get(handlers::list_allocations))
        .route("/health", get(handlers::health))
        .with_state(state)
}
