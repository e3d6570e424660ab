//! The two providers that must always be present regardless of runtime
//! configuration: `ping` (liveness probe for the tool path itself) and
//! `echo` (identity, useful for scripted tests).

use crate::{Provider, ProviderError};
use async_trait::async_trait;
use serde_json::Value;

pub struct PingProvider;

#[async_trait]
impl Provider for PingProvider {
    fn name(&self) -> &'static str {
        "ping"
    }

    async fn call(&self, _method: &str, _args: &Value) -> Result<Value, ProviderError> {
        Ok(serde_json::json!({"pong": true}))
    }
}

pub struct EchoProvider;

#[async_trait]
impl Provider for EchoProvider {
    fn name(&self) -> &'static str {
        "echo"
    }

    async fn call(&self, _method: &str, args: &Value) -> Result<Value, ProviderError> {
        Ok(serde_json::json!({"echo": args}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ping_ignores_method_and_args() {
        let p = PingProvider;
        let result = p.call("anything", &serde_json::json!({"x": 1})).await.unwrap();
        assert_eq!(result, serde_json::json!({"pong": true}));
    }

    #[tokio::test]
    async fn echo_returns_args_verbatim() {
        let p = EchoProvider;
        let args = serde_json::json!({"hello": "world"});
        let result = p.call("echo", &args).await.unwrap();
        assert_eq!(result["echo"], args);
    }
}
