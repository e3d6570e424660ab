//! Tool dispatch types shared between the planner, router, and orchestrator.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single tool invocation requested by a plan step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub method: String,
    #[serde(default)]
    pub args: Value,
    /// Correlator back to the originating plan step; hidden from the model,
    /// attached by the scheduler when a batch is produced.
    #[serde(rename = "_step_id", skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
}

/// Structured error code attached to a failed `ToolResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolErrorKind {
    InvalidToolCall,
    UnknownTool,
    ToolException,
    InvalidMethod,
    UnknownMethod,
    InvalidArgs,
    LanHostNotAllowlisted,
    DnsResolutionFailed,
    ExecutableNotAllowed,
    Timeout,
    PermissionError,
}

/// Uniform result returned by the Tool Router for every dispatched call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub ok: bool,
    pub name: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(rename = "_step_id", skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
}

impl ToolResult {
    pub fn ok(name: impl Into<String>, method: impl Into<String>, result: Value) -> Self {
        Self {
            ok: true,
            name: name.into(),
            method: method.into(),
            result: Some(result),
            error: None,
            details: None,
            step_id: None,
        }
    }

    pub fn err(
        name: impl Into<String>,
        method: impl Into<String>,
        error: ToolErrorKind,
        details: Value,
    ) -> Self {
        Self {
            ok: false,
            name: name.into(),
            method: method.into(),
            result: None,
            error: Some(error),
            details: Some(details),
            step_id: None,
        }
    }

    pub fn with_step_id(mut self, step_id: Option<String>) -> Self {
        self.step_id = step_id;
        self
    }
}

/// Message role, matching the four roles in the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// A single turn in a session's conversation log. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>, timestamp: f64) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp,
            meta: None,
        }
    }

    pub fn user(content: impl Into<String>, timestamp: f64) -> Self {
        Self::new(Role::User, content, timestamp)
    }

    pub fn assistant(content: impl Into<String>, timestamp: f64) -> Self {
        Self::new(Role::Assistant, content, timestamp)
    }
}
