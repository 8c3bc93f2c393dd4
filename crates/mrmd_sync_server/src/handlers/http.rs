//! Control-plane HTTP endpoints, served on the same port as the socket
//! protocol. All responses pass through the CORS layer installed on the
//! router, so they carry `Access-Control-Allow-Origin: *`.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use super::AppState;

/// `GET /health` and `GET /healthz`.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    if state.hub.is_shutting_down() {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "shutting_down", "shutting_down": true})),
        )
    } else {
        (
            StatusCode::OK,
            Json(json!({"status": "healthy", "shutting_down": false})),
        )
    }
}

/// `GET /metrics`.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.to_json())
}

/// `GET /stats`: metrics plus the open-document listing and the effective
/// configuration.
pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    let mut body = state.metrics.to_json();
    body["documents"] = serde_json::to_value(state.hub.document_stats().await)
        .unwrap_or_else(|_| serde_json::Value::Array(Vec::new()));
    body["config"] = serde_json::to_value(state.config.as_ref())
        .unwrap_or_else(|_| serde_json::Value::Null);
    Json(body)
}
