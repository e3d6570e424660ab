//! Cross-cutting request observability: `X-Request-Id` injection, latency
//! metrics, and the JSONL request log.
//!
//! `tower-http`'s `TraceLayer` covers structured logs but not a request-id
//! header or a persisted JSONL sink, so this is hand-rolled
//! `axum::middleware::from_fn` wrapping every request the same way
//! `TraceLayer` does.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use std::net::SocketAddr;
use std::time::Instant;

use sa_metrics::RequestLogRecord;

use crate::state::AppState;

/// Response-extension payload a handler may attach to surface chat-specific
/// log fields (`session_id`, `plan_id`, `chat_total_ms`) to the outer
/// logging middleware without the middleware knowing about `/chat` at all.
#[derive(Debug, Clone, Default)]
pub struct ChatLogExtra {
    pub session_id: Option<String>,
    pub plan_id: Option<String>,
    pub chat_total_ms: Option<u64>,
}

pub async fn observe(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let remote = connect_info
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let start = Instant::now();

    let mut response = next.run(request).await;

    let latency_ms = start.elapsed().as_millis() as u64;
    let status = response.status().as_u16();

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }

    let extra = response
        .extensions_mut()
        .remove::<ChatLogExtra>()
        .unwrap_or_default();

    state.metrics.record_request(&path, status, latency_ms);
    if status == 429 {
        state.metrics.record_rate_limited();
    }

    state.request_log.append(&RequestLogRecord {
        ts: RequestLogRecord::now_ts(),
        request_id,
        remote,
        method,
        path,
        status,
        latency_ms,
        session_id: extra.session_id,
        plan_id: extra.plan_id,
        chat_total_ms: extra.chat_total_ms,
    });

    response
}
