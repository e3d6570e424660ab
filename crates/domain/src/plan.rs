//! Plan/Step/Checkpoint data model.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const MAX_STEPS: usize = 10_000;
pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_PROMPT_CHARS: usize = 8_000;
pub const MAX_SUMMARY_CHARS: usize = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    New,
    Running,
    Done,
    Failed,
    FailedNormalize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Tool,
    Llm,
    Note,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Done,
    Failed,
    Skipped,
}

/// A tool invocation attached to a `type = tool` step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTool {
    pub name: String,
    pub method: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<StepTool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl Step {
    pub fn is_ready(&self, done_ids: &std::collections::HashSet<&str>) -> bool {
        self.status == StepStatus::Pending
            && self.step_type == StepType::Tool
            && self.tool.is_some()
            && self.depends_on.iter().all(|d| done_ids.contains(d.as_str()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub at_step: String,
    pub ts: f64,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub goal: String,
    pub created_ts: f64,
    pub status: PlanStatus,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,
}

impl Plan {
    /// Find the index of a step by id.
    pub fn step_index(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }

    pub fn done_step_ids(&self) -> std::collections::HashSet<&str> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Done)
            .map(|s| s.id.as_str())
            .collect()
    }

    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        let mut m = BTreeMap::new();
        m.insert("total", self.steps.len());
        m.insert(
            "done",
            self.steps.iter().filter(|s| s.status == StepStatus::Done).count(),
        );
        m.insert(
            "failed",
            self.steps
                .iter()
                .filter(|s| s.status == StepStatus::Failed)
                .count(),
        );
        m.insert(
            "pending",
            self.steps
                .iter()
                .filter(|s| s.status == StepStatus::Pending)
                .count(),
        );
        m
    }
}

/// A semantic chunk stored by the semantic index. Primary key is
/// `(source_id, chunk_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub source_id: String,
    pub chunk_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    pub updated_ts: f64,
}

/// A single semantic search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub source_id: String,
    pub chunk_id: String,
    pub snippet: String,
    pub score: f64,
}
