//! HTTP handlers.

use std::collections::BTreeSet;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use serpens_deploy::DeployRequest;
use serpens_state::Allocation;

use crate::ApiState;
use crate::signature::{self, SIGNATURE_HEADER};

pub const SERVICE_NAME: &str = "serpens-deployment-api";
pub const PORTS_RANGE: &str = "3000-9999";

/// Webhook reply. Never carries a deployment outcome.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WebhookResponse {
    DeploymentStarted { service: String },
    Ignored { reason: String },
}

fn ignored(status: StatusCode, reason: &str) -> (StatusCode, Json<WebhookResponse>) {
    (
        status,
        Json(WebhookResponse::Ignored {
            reason: reason.to_string(),
        }),
    )
}

// ── Webhook ────────────────────────────────────────────────────

/// POST /webhook/deploy
pub async fn deploy_webhook(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let Some(sig) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) else {
        warn!("webhook without signature");
        return ignored(StatusCode::UNAUTHORIZED, "missing signature");
    };
    if !signature::verify(&state.secret, &body, sig) {
        warn!("webhook with invalid signature");
        return ignored(StatusCode::UNAUTHORIZED, "invalid signature");
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "webhook body is not JSON");
            return ignored(StatusCode::BAD_REQUEST, "invalid JSON payload");
        }
    };

    let repository = payload
        .pointer("/repository/full_name")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if !state.coordinator.allow_list().allows(repository) {
        warn!(repository, "webhook from repository not in allow-list");
        return ignored(StatusCode::FORBIDDEN, "repository not allowed");
    }

    if payload.get("action").and_then(Value::as_str) != Some("deployment") {
        return ignored(StatusCode::OK, "not a deployment event");
    }

    let service = payload.pointer("/deployment/payload/service").and_then(Value::as_str);
    let tag = payload.pointer("/deployment/payload/tag").and_then(Value::as_str);
    let (Some(service), Some(tag)) = (service, tag) else {
        warn!(repository, "deployment event without service or tag");
        return ignored(StatusCode::OK, "deployment payload missing service or tag");
    };

    info!(repository, service, tag, "deployment accepted");
    state.coordinator.spawn(DeployRequest {
        repository: repository.to_string(),
        service: service.to_string(),
        tag: tag.to_string(),
    });

    (
        StatusCode::OK,
        Json(WebhookResponse::DeploymentStarted {
            service: service.to_string(),
        }),
    )
}

// ── Allocations ────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct AllocationsResponse {
    pub allocations: Vec<Allocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<AllocationStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AllocationStats {
    pub total_services: usize,
    pub ports_range: String,
}

/// GET /serpens/allocations
pub async fn list_allocations(State(state): State<ApiState>) -> impl IntoResponse {
    let response = match state.coordinator.registry().current_allocations() {
        Ok(allocations) => {
            let services: BTreeSet<&str> =
                allocations.iter().map(|a| a.service.as_str()).collect();
            let stats = AllocationStats {
                total_services: services.len(),
                ports_range: PORTS_RANGE.to_string(),
            };
            AllocationsResponse {
                allocations,
                stats: Some(stats),
                error: None,
            }
        }
        Err(e) => {
            error!(error = %e, "failed to read allocations");
            AllocationsResponse {
                allocations: Vec::new(),
                stats: None,
                error: Some("internal error".to_string()),
            }
        }
    };
    Json(response)
}

// ── Health ─────────────────────────────────────────────────────

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy", "service": SERVICE_NAME }))
}
