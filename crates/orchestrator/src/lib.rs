//! Orchestrator (C10): the turn sequence that ties every other component
//! together — conversation memory, context assembly, planning, tool
//! dispatch, and checkpointing.
//!
//! One turn appends the message, builds context, calls the LLM, normalizes
//! and schedules the resulting plan, dispatches the next runnable step
//! through the tool router, checkpoints the outcome, and appends the
//! reply.

use sa_checkpoint::{CheckpointState, CheckpointStore};
use sa_context::ContextAssembler;
use sa_convlog::ConversationLog;
use sa_domain::plan::{Plan, PlanStatus, SearchHit};
use sa_domain::tool::{Message, ToolResult};
use sa_llm::LlmClient;
use sa_planner::{apply_tool_results, get_ready_tool_batch, normalize};
use sa_semindex::SemanticIndex;
use sa_tools::ToolRouter;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;

const PLAN_SYSTEM_PROMPT: &str = r#"You plan and execute tasks for a local agent runtime. \
Respond with exactly one JSON object and nothing else, in one of two shapes:
1. {"steps": [{"id": str?, "title": str, "type": "tool"|"llm"|"note", "depends_on": [str]?, "tool": {"name": str, "method": str, "args": object}?, "prompt": str?}]}
2. {"tool_calls": [{"name": str, "method": str, "args": object}], "final": str}
Do not include any prose outside the JSON object."#;

const FINAL_SYSTEM_PROMPT: &str = r#"You are finishing a task given its plan status and tool results. \
Respond with exactly one JSON object: {"final": str}. Do not include any prose outside the JSON object."#;

/// Per-turn timings in milliseconds, matching the fields the contract
/// names verbatim.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TimingMs {
    pub total: u64,
    pub memory_add: u64,
    pub context_build: u64,
    pub llm_plan: u64,
    pub planner_tools: u64,
    pub llm_final: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatOutcome {
    pub ok: bool,
    pub session_id: String,
    pub r#final: Option<String>,
    pub tool_results: Vec<ToolResult>,
    pub plan: Option<Plan>,
    pub error: Option<String>,
    pub details: Option<Value>,
    pub timing_ms: TimingMs,
    pub tool_calls_count: usize,
    pub tool_batches: usize,
    pub checkpoint: Option<Value>,
}

pub struct Orchestrator {
    pub checkpoints: CheckpointStore,
    pub convlog: ConversationLog,
    pub semindex: SemanticIndex,
    pub context: ContextAssembler,
    pub tools: ToolRouter,
    pub llm: Arc<LlmClient>,
    pub tool_batch_size: usize,
}

impl Orchestrator {
    pub async fn handle_chat(
        &self,
        message: &str,
        session_id: &str,
        plan_id: Option<&str>,
    ) -> ChatOutcome {
        let total_start = Instant::now();
        match self.handle_chat_inner(message, session_id, plan_id, &total_start).await {
            Ok(mut outcome) => {
                outcome.timing_ms.total = total_start.elapsed().as_millis() as u64;
                outcome
            }
            Err(e) => ChatOutcome {
                ok: false,
                session_id: session_id.to_string(),
                r#final: None,
                tool_results: vec![],
                plan: None,
                error: Some("MASTERAGENT_EXCEPTION".to_string()),
                details: Some(serde_json::json!({"type": "internal_error", "message": e})),
                timing_ms: TimingMs {
                    total: total_start.elapsed().as_millis() as u64,
                    ..Default::default()
                },
                tool_calls_count: 0,
                tool_batches: 0,
                checkpoint: None,
            },
        }
    }

    async fn handle_chat_inner(
        &self,
        message: &str,
        session_id: &str,
        plan_id: Option<&str>,
        total_start: &Instant,
    ) -> Result<ChatOutcome, String> {
        let mut timing = TimingMs::default();
        let now_ts = unix_ts();

        // 1. Append user message.
        let t = Instant::now();
        self.convlog
            .append_one(session_id, Message::user(message, now_ts))
            .map_err(|e| e.to_string())?;
        timing.memory_add = t.elapsed().as_millis() as u64;

        // 2. Build context.
        let t = Instant::now();
        let history = self.convlog.read_tail(session_id, self.context.episodic_turns).map_err(|e| e.to_string())?;
        let hits: Vec<SearchHit> = self
            .semindex
            .search(message, self.context.semantic_top_k, None)
            .await
            .unwrap_or_default();
        let (context_text, _report) = self.context.build(message, &history, &hits);
        timing.context_build = t.elapsed().as_millis() as u64;

        // 3. Branch on resume.
        let mut plan: Plan;
        let mut raw_model_text: Option<String> = None;

        if let Some(pid) = plan_id.filter(|p| self.checkpoints.exists(p)) {
            let mut state = self.checkpoints.load(pid).await.map_err(|e| e.to_string())?;
            state.plan.status = PlanStatus::Running;
            plan = state.plan.clone();
            self.checkpoints.save(&mut state).await.map_err(|e| e.to_string())?;
        } else {
            let t = Instant::now();
            let outcome = self.llm.chat_plan(PLAN_SYSTEM_PROMPT, &context_text).await;
            timing.llm_plan = t.elapsed().as_millis() as u64;

            let content = match outcome.content {
                Some(c) => c,
                None => {
                    return Ok(self.finalize_without_plan(
                        session_id,
                        message,
                        outcome.error.unwrap_or_else(|| "LLM_UNREACHABLE".into()),
                        timing,
                    ).await.map_err(|e| e.to_string())?);
                }
            };

            let parsed = find_balanced_json(&content);
            let Some(raw_value) = parsed else {
                // No JSON recoverable: treat the raw text as the final answer.
                return Ok(self
                    .finalize_raw_text(session_id, message, content, timing)
                    .await
                    .map_err(|e| e.to_string())?);
            };

            match normalize(&raw_value, now_ts) {
                Ok(p) => plan = p,
                Err(e) => {
                    raw_model_text = Some(content.clone());
                    let diagnostic = serde_json::json!({
                        "raw": raw_value,
                        "adapted": Value::Null,
                        "error": e.code(),
                    });
                    let mut failed_plan = Plan {
                        plan_id: short_hash(&format!("{session_id}|{now_ts}"), 16),
                        goal: message.to_string(),
                        created_ts: now_ts,
                        status: PlanStatus::FailedNormalize,
                        steps: vec![],
                        checkpoints: vec![],
                    };
                    failed_plan.status = PlanStatus::FailedNormalize;
                    let mut state = CheckpointState::wrap(failed_plan.clone());
                    state.tool_results_ref = None;
                    state.cursors.insert("diagnostic".to_string(), diagnostic.to_string());
                    let _ = self.checkpoints.save(&mut state).await;

                    return Ok(ChatOutcome {
                        ok: false,
                        session_id: session_id.to_string(),
                        r#final: raw_model_text,
                        tool_results: vec![],
                        plan: Some(failed_plan),
                        error: Some("PLAN_NORMALIZE_FAILED".to_string()),
                        details: Some(diagnostic),
                        timing_ms: timing,
                        tool_calls_count: 0,
                        tool_batches: 0,
                        checkpoint: None,
                    });
                }
            }

            let mut state = CheckpointState::wrap(plan.clone());
            self.checkpoints.save(&mut state).await.map_err(|e| e.to_string())?;
        }

        // 5. Batch execution loop.
        let t = Instant::now();
        let mut all_tool_results: Vec<ToolResult> = Vec::new();
        let mut tool_calls_count = 0usize;
        let mut tool_batches = 0usize;

        loop {
            let batch = get_ready_tool_batch(&plan, self.tool_batch_size);
            if batch.tool_calls.is_empty() {
                break;
            }
            tool_calls_count += batch.tool_calls.len();
            tool_batches += 1;

            let mut batch_results = Vec::with_capacity(batch.tool_calls.len());
            for call in &batch.tool_calls {
                let result = self.tools.dispatch(call).await;
                batch_results.push(result);
            }

            plan = apply_tool_results(&plan, &batch_results);
            all_tool_results.extend(batch_results);

            let mut state = CheckpointState::wrap(plan.clone());
            self.checkpoints.save(&mut state).await.map_err(|e| e.to_string())?;
        }
        timing.planner_tools = t.elapsed().as_millis() as u64;

        // 6. Final synthesis.
        let counts = plan.counts();
        let summary = serde_json::json!({
            "plan_id": plan.plan_id,
            "goal": plan.goal,
            "total": counts.get("total").copied().unwrap_or(0),
            "done": counts.get("done").copied().unwrap_or(0),
            "failed": counts.get("failed").copied().unwrap_or(0),
            "pending": counts.get("pending").copied().unwrap_or(0),
        });
        let results_json = serde_json::to_value(&all_tool_results).map_err(|e| e.to_string())?;
        let final_user_content = format!(
            "{context_text}\n\nPLAN_STATUS: {summary}\n\nTOOL_RESULTS: {results_json}"
        );

        let t = Instant::now();
        let final_outcome = self.llm.chat_final(FINAL_SYSTEM_PROMPT, &final_user_content).await;
        timing.llm_final = t.elapsed().as_millis() as u64;

        let final_text = final_outcome
            .content
            .as_deref()
            .and_then(extract_final_field)
            .or(final_outcome.content.clone())
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "(no output)".to_string());

        // 7. Append assistant message + upsert summary chunk.
        let now_ts2 = unix_ts();
        let _ = self.convlog.append_one(session_id, Message::assistant(final_text.clone(), now_ts2));

        let date = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let chunk_seed = format!(
            "{session_id}|{date}|{}|{}",
            message,
            truncate_chars(&final_text, 2000)
        );
        let chunk_id = short_hash(&chunk_seed, 24);
        let chunk = sa_domain::plan::Chunk {
            source_id: "task_summaries".to_string(),
            chunk_id,
            text: final_text.clone(),
            meta: Some(serde_json::json!({"session_id": session_id})),
            updated_ts: now_ts2,
        };
        let _ = self.semindex.upsert_chunk(&chunk).await;

        // 8. Final checkpoint.
        let any_failed = plan.steps.iter().any(|s| s.status == sa_domain::plan::StepStatus::Failed);
        plan.status = if any_failed { PlanStatus::Failed } else { PlanStatus::Done };
        let mut state = CheckpointState::wrap(plan.clone());
        self.checkpoints.save(&mut state).await.map_err(|e| e.to_string())?;

        Ok(ChatOutcome {
            ok: true,
            session_id: session_id.to_string(),
            r#final: Some(final_text),
            tool_results: all_tool_results,
            plan: Some(plan.clone()),
            error: None,
            details: None,
            timing_ms: timing,
            tool_calls_count,
            tool_batches,
            checkpoint: Some(serde_json::json!({"plan_id": plan.plan_id, "status": plan.status})),
        })
    }

    async fn finalize_raw_text(
        &self,
        session_id: &str,
        _message: &str,
        raw_text: String,
        timing: TimingMs,
    ) -> sa_domain::Result<ChatOutcome> {
        let now_ts = unix_ts();
        self.convlog.append_one(session_id, Message::assistant(raw_text.clone(), now_ts))?;
        Ok(ChatOutcome {
            ok: true,
            session_id: session_id.to_string(),
            r#final: Some(raw_text),
            tool_results: vec![],
            plan: None,
            error: None,
            details: None,
            timing_ms: timing,
            tool_calls_count: 0,
            tool_batches: 0,
            checkpoint: None,
        })
    }

    async fn finalize_without_plan(
        &self,
        session_id: &str,
        _message: &str,
        error_code: String,
        timing: TimingMs,
    ) -> sa_domain::Result<ChatOutcome> {
        Ok(ChatOutcome {
            ok: false,
            session_id: session_id.to_string(),
            r#final: None,
            tool_results: vec![],
            plan: None,
            error: Some(error_code),
            details: None,
            timing_ms: timing,
            tool_calls_count: 0,
            tool_batches: 0,
            checkpoint: None,
        })
    }
}

fn unix_ts() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

fn short_hash(seed: &str, len: usize) -> String {
    let digest = Sha256::digest(seed.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex.chars().take(len).collect()
}

/// Scan `text` for the first balanced top-level `{...}` object and parse it,
/// ignoring any leading/trailing prose the model emitted despite being told
/// not to.
fn find_balanced_json(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        let c = b as char;
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &text[start..=i];
                    return serde_json::from_str(candidate).ok();
                }
            }
            _ => {}
        }
    }
    None
}

fn extract_final_field(text: &str) -> Option<String> {
    let value = find_balanced_json(text)?;
    value.get("final").and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_balanced_json_extracts_first_object_ignoring_prose() {
        let text = "Sure, here you go:\n{\"final\": \"hi\"}\nthanks";
        let value = find_balanced_json(text).unwrap();
        assert_eq!(value["final"], "hi");
    }

    #[test]
    fn find_balanced_json_handles_nested_braces_and_strings() {
        let text = r#"{"steps": [{"title": "do \"x\" {y}"}]}"#;
        let value = find_balanced_json(text).unwrap();
        assert_eq!(value["steps"][0]["title"], "do \"x\" {y}");
    }

    #[test]
    fn find_balanced_json_returns_none_when_absent() {
        assert!(find_balanced_json("no json here").is_none());
    }

    #[test]
    fn extract_final_field_pulls_string_value() {
        assert_eq!(
            extract_final_field(r#"{"final": "done"}"#),
            Some("done".to_string())
        );
    }

    #[test]
    fn short_hash_is_deterministic_and_truncated() {
        let a = short_hash("seed", 16);
        let b = short_hash("seed", 16);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }
}
