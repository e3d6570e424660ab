pub mod chat;
pub mod health;
pub mod metrics;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router. This surface is entirely unauthenticated —
/// it binds to loopback only and trusts its local caller.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/llm", get(health::health_llm))
        .route("/metrics", get(metrics::metrics))
        .route("/chat", post(chat::chat))
        .fallback(not_found)
}

async fn not_found() -> impl axum::response::IntoResponse {
    (
        axum::http::StatusCode::NOT_FOUND,
        axum::Json(serde_json::json!({"ok": false, "error": "NOT_FOUND"})),
    )
}
