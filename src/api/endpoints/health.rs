//! Health check endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::api::types::ApiContext;
use crate::core_state::StoreState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub store: StoreState,
    pub version: &'static str,
}

/// `GET /api/health`: 200 when the store is ready, 503 otherwise.
pub async fn check(State(ctx): State<ApiContext>) -> (StatusCode, Json<HealthResponse>) {
    let store = ctx.core.store_state();
    let (code, status) = match store {
        StoreState::Ready => (StatusCode::OK, "ok"),
        StoreState::Disconnected | StoreState::Connecting | StoreState::Failed { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    };

    (
        code,
        Json(HealthResponse {
            status,
            store,
            version: crate::config::APP_VERSION,
        }),
    )
}
