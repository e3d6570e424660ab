//! `GET /metrics` — counters, latency histograms, and warmup status.

use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let warmup = state.llm.warmup_snapshot();
    Json(state.metrics.snapshot(warmup))
}
