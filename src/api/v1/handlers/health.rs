/*
 * Responsibility
 * - GET /health (liveness plus the active cache backend)
 */
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde_json::json;

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({"status": "ok", "cache": state.backend.kind().as_str()})),
    )
}
