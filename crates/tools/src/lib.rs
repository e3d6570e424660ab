//! Tool Router (C6): uniform dispatch across capability providers, plus the
//! provider implementations for the two systems-discipline tools the
//! orchestrator's safety model depends on — the HTTP fetcher (C7) and the
//! subprocess runner (C8).
//!
//! Grounded on the original tool router's error taxonomy
//! (`INVALID_TOOL_CALL` / `UNKNOWN_TOOL` / `TOOL_EXCEPTION`) and dispatch
//! discipline: the router never inspects a provider beyond its single
//! `call(method, args)` surface.

pub mod canonical;
pub mod providers;

use async_trait::async_trait;
use futures_util::FutureExt;
use sa_domain::tool::{ToolCall, ToolErrorKind, ToolResult};
use serde_json::Value;
use std::collections::HashMap;

/// Structured error returned by a provider. `kind` drives the response's
/// `error` field; `details` is free-form diagnostic payload.
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub kind: ToolErrorKind,
    pub details: Value,
}

impl ProviderError {
    pub fn new(kind: ToolErrorKind, details: Value) -> Self {
        Self { kind, details }
    }

    pub fn invalid_method(method: &str) -> Self {
        Self::new(
            ToolErrorKind::InvalidMethod,
            serde_json::json!({"method": method}),
        )
    }

    pub fn unknown_method(method: &str) -> Self {
        Self::new(
            ToolErrorKind::UnknownMethod,
            serde_json::json!({"method": method}),
        )
    }

    pub fn invalid_args(reason: impl Into<String>) -> Self {
        Self::new(
            ToolErrorKind::InvalidArgs,
            serde_json::json!({"reason": reason.into()}),
        )
    }
}

/// Uniform operation contract every capability provider implements.
#[async_trait]
pub trait Provider: Send + Sync {
    /// The canonical name this provider registers under (`"ping"`,
    /// `"browser"`, `"terminal"`, `"file"`, ...).
    fn name(&self) -> &'static str;

    async fn call(&self, method: &str, args: &Value) -> Result<Value, ProviderError>;
}

pub struct ToolRouter {
    providers: HashMap<String, Box<dyn Provider>>,
}

impl Default for ToolRouter {
    fn default() -> Self {
        let mut router = Self {
            providers: HashMap::new(),
        };
        router.register(Box::new(providers::baseline::PingProvider));
        router.register(Box::new(providers::baseline::EchoProvider));
        router
    }
}

impl ToolRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Box<dyn Provider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    /// Sorted set of every registered provider name.
    pub fn available_tools(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        if call.name.trim().is_empty() {
            return ToolResult::err(
                call.name.clone(),
                call.method.clone(),
                ToolErrorKind::InvalidToolCall,
                serde_json::json!({"reason": "empty tool name"}),
            )
            .with_step_id(call.step_id.clone());
        }

        let (name, method) = canonical::canonicalize(&call.name, &call.method);

        let provider = match self.providers.get(&name) {
            Some(p) => p,
            None => {
                return ToolResult::err(
                    name,
                    method,
                    ToolErrorKind::UnknownTool,
                    serde_json::json!({"available": self.available_tools()}),
                )
                .with_step_id(call.step_id.clone());
            }
        };

        let outcome = std::panic::AssertUnwindSafe(provider.call(&method, &call.args))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(Ok(value)) => ToolResult::ok(name, method, value),
            Ok(Err(provider_err)) => {
                ToolResult::err(name, method, provider_err.kind, provider_err.details)
            }
            Err(panic) => {
                let message = panic_message(&panic);
                tracing::warn!(tool = %call.name, error = %message, "provider panicked");
                ToolResult::err(
                    name,
                    method,
                    ToolErrorKind::ToolException,
                    serde_json::json!({"message": message}),
                )
            }
        };

        result.with_step_id(call.step_id.clone())
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ping_and_echo_are_registered_by_default() {
        let router = ToolRouter::new();
        assert_eq!(router.available_tools(), vec!["echo".to_string(), "ping".to_string()]);
    }

    #[tokio::test]
    async fn dispatch_to_ping_succeeds() {
        let router = ToolRouter::new();
        let call = ToolCall {
            name: "ping".into(),
            method: "get".into(),
            args: serde_json::json!({}),
            step_id: Some("s1".into()),
        };
        let result = router.dispatch(&call).await;
        assert!(result.ok);
        assert_eq!(result.result.unwrap()["pong"], true);
        assert_eq!(result.step_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn dispatch_unknown_tool_reports_available_names() {
        let router = ToolRouter::new();
        let call = ToolCall {
            name: "nonexistent".into(),
            method: "x".into(),
            args: serde_json::json!({}),
            step_id: None,
        };
        let result = router.dispatch(&call).await;
        assert!(!result.ok);
        assert_eq!(result.error, Some(ToolErrorKind::UnknownTool));
        assert!(result.details.unwrap()["available"].is_array());
    }

    #[tokio::test]
    async fn dispatch_empty_name_is_invalid_tool_call() {
        let router = ToolRouter::new();
        let call = ToolCall {
            name: "".into(),
            method: "x".into(),
            args: serde_json::json!({}),
            step_id: None,
        };
        let result = router.dispatch(&call).await;
        assert_eq!(result.error, Some(ToolErrorKind::InvalidToolCall));
    }

    #[tokio::test]
    async fn dispatch_canonicalizes_browser_fetch_to_http_get() {
        // "browser" has no registered provider in this bare router, so the
        // dispatch should fail as UnknownTool but with the canonicalized
        // method name recorded for diagnosability.
        let router = ToolRouter::new();
        let call = ToolCall {
            name: "browser".into(),
            method: "fetch".into(),
            args: serde_json::json!({"url": "http://example.com"}),
            step_id: None,
        };
        let result = router.dispatch(&call).await;
        assert_eq!(result.method, "http_get");
    }
}
