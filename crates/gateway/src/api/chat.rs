//! `POST /chat` — admission control followed by one orchestrator turn.

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::net::SocketAddr;

use crate::middleware::ChatLogExtra;
use crate::state::AppState;

fn default_session_id() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize)]
struct ChatRequestBody {
    #[serde(default)]
    message: Option<serde_json::Value>,
    #[serde(default = "default_session_id")]
    session_id: serde_json::Value,
    #[serde(default)]
    plan_id: Option<serde_json::Value>,
}

fn schema_error() -> Response {
    json_response(
        StatusCode::BAD_REQUEST,
        serde_json::json!({"ok": false, "error": "INVALID_SCHEMA"}),
    )
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (status, axum::Json(body)).into_response()
}

pub async fn chat(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    body: axum::body::Bytes,
) -> Response {
    if let Err(retry_after_s) = state.rate_limiter.check(addr.ip()) {
        let mut response = json_response(
            StatusCode::TOO_MANY_REQUESTS,
            serde_json::json!({"ok": false, "error": "RATE_LIMITED", "retry_after_s": retry_after_s}),
        );
        if let Ok(value) = HeaderValue::from_str(&retry_after_s.to_string()) {
            response.headers_mut().insert("retry-after", value);
        }
        return response;
    }

    let Some(_guard) = state.metrics.try_enter_chat() else {
        return json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({"ok": false, "error": "BUSY"}),
        );
    };

    let max_body_bytes = state.config.server.max_body_bytes;
    if body.len() > max_body_bytes {
        return json_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            serde_json::json!({"ok": false, "error": "PAYLOAD_TOO_LARGE"}),
        );
    }

    let parsed: ChatRequestBody = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return schema_error(),
    };

    let message = match parsed.message {
        Some(serde_json::Value::String(s)) if !s.is_empty() => s,
        _ => return schema_error(),
    };
    if message.chars().count() > state.config.server.max_message_chars {
        return json_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            serde_json::json!({"ok": false, "error": "PAYLOAD_TOO_LARGE"}),
        );
    }

    let session_id = match parsed.session_id {
        serde_json::Value::String(s) => s,
        _ => return schema_error(),
    };

    let plan_id = match parsed.plan_id {
        None => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(_) => return schema_error(),
    };

    let outcome = state
        .orchestrator
        .handle_chat(&message, &session_id, plan_id.as_deref())
        .await;

    let total_ms = outcome.timing_ms.total;
    state.metrics.record_chat_total(total_ms);
    if let Some(saved_plan_id) = outcome
        .checkpoint
        .as_ref()
        .and_then(|c| c.get("plan_id"))
        .and_then(|v| v.as_str())
    {
        state.metrics.record_plan_saved(saved_plan_id);
    }

    let mut response = axum::Json(outcome).into_response();
    response.extensions_mut().insert(ChatLogExtra {
        session_id: Some(session_id),
        plan_id,
        chat_total_ms: Some(total_ms),
    });
    response
}
