//! Admin and health endpoints. The one stateful, business-logic route
//! (`/v1/chat/completions`) lives in [`chat`]; everything here just reads
//! off `AppState`. `/health` and `/ready` are mounted unguarded; the rest
//! sit behind the same bearer auth as the chat route (see `server::build_router`).

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::server::AppState;

pub mod chat;

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Distinct from `/health`: readiness additionally fails while the process
/// is draining, so a load balancer stops sending new traffic before the
/// process actually exits.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    if state.shutdown.is_draining() {
        return (axum::http::StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "draining" })));
    }
    (axum::http::StatusCode::OK, Json(json!({ "status": "ready" })))
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

pub async fn metrics_costs(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.cost_snapshot())
}

pub async fn list_providers(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.get_provider_states())
}
