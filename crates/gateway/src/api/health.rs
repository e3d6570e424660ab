//! `GET /health` (liveness) and `GET /health/llm` (deep reachability check).

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

/// Fast liveness probe. Turns unhealthy only once a completed warmup
/// attempt recorded failure — a warmup that hasn't run yet still reports
/// healthy, since warmup never gates the server.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let warmup = state.llm.warmup_snapshot();
    if warmup.done && !warmup.ok {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"ok": false, "error": "WARMUP_FAILED"})),
        );
    }
    (StatusCode::OK, Json(serde_json::json!({"ok": true})))
}

/// Deep check: issues a live trivial chat against the LLM endpoint.
pub async fn health_llm(State(state): State<AppState>) -> impl IntoResponse {
    let outcome = state.llm.ping().await;
    if outcome.ok {
        (
            StatusCode::OK,
            Json(serde_json::json!({"ok": true, "details": outcome.details})),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "ok": false,
                "error": "LLM_UNREACHABLE",
                "details": outcome.details,
            })),
        )
    }
}
