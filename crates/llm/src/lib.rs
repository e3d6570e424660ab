//! LLM Client (C9): a synchronous JSON chat RPC to a locally hosted
//! chat-completions endpoint, plus a supervised background warmup.
//!
//! Flattened to the single local endpoint this system talks to — no
//! multi-provider registry, no streaming, no response-format negotiation.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

const PLAN_TEMPERATURE: f32 = 0.2;
const PLAN_MAX_TOKENS: u32 = 1800;

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Outcome of a single chat RPC. Never an `Err` — transport and protocol
/// failures are reported structurally so the orchestrator decides how to
/// surface them.
#[derive(Debug, Clone)]
pub struct LlmOutcome {
    pub ok: bool,
    pub content: Option<String>,
    pub error: Option<String>,
    pub details: Option<Value>,
}

impl LlmOutcome {
    fn ok(content: String) -> Self {
        Self {
            ok: true,
            content: Some(content),
            error: None,
            details: None,
        }
    }

    fn err(code: &str, reason: impl Into<String>, body: Option<String>) -> Self {
        Self {
            ok: false,
            content: None,
            error: Some(code.to_string()),
            details: Some(serde_json::json!({
                "code": code,
                "reason": reason.into(),
                "body": body,
            })),
        }
    }
}

/// Snapshot of the background warmup attempt, exposed verbatim at
/// `/metrics`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WarmupStatus {
    pub started: bool,
    pub done: bool,
    pub ok: bool,
    pub ms: Option<u64>,
    pub error: Option<String>,
}

pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    model_id: String,
    timeout: Duration,
    warmup: Arc<RwLock<WarmupStatus>>,
}

impl LlmClient {
    pub fn new(base_url: String, model_id: String, timeout_sec: u64) -> Self {
        let http = reqwest::Client::builder()
            .build()
            .expect("building reqwest client must not fail with default settings");
        Self {
            http,
            base_url,
            model_id,
            timeout: Duration::from_secs(timeout_sec),
            warmup: Arc::new(RwLock::new(WarmupStatus::default())),
        }
    }

    pub fn warmup_snapshot(&self) -> WarmupStatus {
        self.warmup.read().clone()
    }

    /// Plan elicitation call: strict-JSON-dialect system prompt, temperature
    /// 0.2, 1800 max tokens.
    pub async fn chat_plan(&self, system_prompt: &str, user_message: &str) -> LlmOutcome {
        self.chat(system_prompt, user_message, PLAN_TEMPERATURE, PLAN_MAX_TOKENS)
            .await
    }

    /// Final synthesis call: same temperature/token budget, different
    /// system prompt (demands `{"final": string}`).
    pub async fn chat_final(&self, system_prompt: &str, user_message: &str) -> LlmOutcome {
        self.chat(system_prompt, user_message, PLAN_TEMPERATURE, PLAN_MAX_TOKENS)
            .await
    }

    async fn chat(
        &self,
        system_prompt: &str,
        user_message: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> LlmOutcome {
        let request = ChatRequest {
            model: self.model_id.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user_message.to_string(),
                },
            ],
            temperature,
            max_tokens,
            stream: false,
        };

        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));

        let response = match self
            .http
            .post(&url)
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return LlmOutcome::err(
                    if e.is_timeout() { "TIMEOUT" } else { "LLM_UNREACHABLE" },
                    e.to_string(),
                    None,
                )
            }
        };

        let status = response.status();
        let body_text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return LlmOutcome::err(
                "LLM_UNREACHABLE",
                format!("HTTP {status}"),
                Some(body_text),
            );
        }

        let parsed: ChatCompletion = match serde_json::from_str(&body_text) {
            Ok(v) => v,
            Err(e) => {
                return LlmOutcome::err("INVALID_LLM_RESPONSE", e.to_string(), Some(body_text));
            }
        };

        match parsed.choices.into_iter().next().and_then(|c| c.message.content) {
            Some(content) => LlmOutcome::ok(content),
            None => LlmOutcome::err("NO_CHOICES", "response carried no choices", Some(body_text)),
        }
    }

    /// On-demand reachability probe for `/health/llm`. Does not touch the
    /// warmup snapshot — callers read `outcome.ok`/`outcome.details`.
    pub async fn ping(&self) -> LlmOutcome {
        self.chat("You are a readiness probe.", "OK", PLAN_TEMPERATURE, 16)
            .await
    }

    /// Fire-and-record a trivial warmup chat. Intended to be spawned once
    /// at startup; never gates server readiness.
    pub async fn run_warmup(&self) {
        {
            let mut w = self.warmup.write();
            w.started = true;
        }
        let start = Instant::now();
        let outcome = self.chat("You are a readiness probe.", "OK", PLAN_TEMPERATURE, 16).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let mut w = self.warmup.write();
        w.done = true;
        w.ms = Some(elapsed_ms);
        w.ok = outcome.ok;
        w.error = outcome.error.clone();

        if outcome.ok {
            tracing::info!(ms = elapsed_ms, "LLM warmup succeeded");
        } else {
            tracing::warn!(ms = elapsed_ms, error = ?outcome.error, "LLM warmup failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warmup_snapshot_starts_empty() {
        let client = LlmClient::new("http://127.0.0.1:1".into(), "test-model".into(), 5);
        let snap = client.warmup_snapshot();
        assert!(!snap.started);
        assert!(!snap.done);
    }

    #[tokio::test]
    async fn chat_against_unreachable_host_reports_structured_error() {
        let client = LlmClient::new("http://127.0.0.1:1".into(), "test-model".into(), 1);
        let outcome = client.chat_plan("sys", "hello").await;
        assert!(!outcome.ok);
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn run_warmup_records_failure_against_unreachable_host() {
        let client = LlmClient::new("http://127.0.0.1:1".into(), "test-model".into(), 1);
        client.run_warmup().await;
        let snap = client.warmup_snapshot();
        assert!(snap.started);
        assert!(snap.done);
        assert!(!snap.ok);
        assert!(snap.ms.is_some());
    }
}
