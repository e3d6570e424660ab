//! Plan Normalizer & Scheduler (C5): accepts two plan dialects from the
//! model, canonicalizes them into a DAG of steps, and exposes `Plan` as a
//! pure-function scheduling surface (`get_ready_tool_batch`,
//! `apply_tool_results`) so batch execution order never affects the final
//! plan state.

use sa_domain::plan::{Plan, PlanStatus, Step, StepStatus, StepTool, StepType, MAX_PROMPT_CHARS, MAX_STEPS, MAX_TITLE_CHARS};
use sa_domain::tool::{ToolCall, ToolResult};
use sa_domain::{Error, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

/// Normalize a raw model payload into a canonical `Plan`.
///
/// Accepts either a full plan object (`{"steps": [...], ...}`) or the
/// tool-calls shorthand (`{"tool_calls": [...], "final": "..."}`), the two
/// dialects the plan-elicitation prompt permits.
pub fn normalize(raw: &Value, created_ts: f64) -> Result<Plan> {
    let obj = raw
        .as_object()
        .ok_or(Error::UnsupportedPlanFormat)?;

    let plan_id = match obj.get("plan_id").and_then(Value::as_str) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => short_hash(&raw.to_string(), 16),
    };

    let mut steps = if let Some(steps_val) = obj.get("steps") {
        normalize_full_steps(steps_val, &plan_id)?
    } else if obj.contains_key("tool_calls") {
        normalize_tool_calls_dialect(obj, &plan_id)?
    } else {
        return Err(Error::UnsupportedPlanFormat);
    };

    if steps.len() > MAX_STEPS {
        return Err(Error::TooManySteps);
    }

    dedupe_step_ids(&mut steps, &plan_id);
    drop_dangling_dependencies(&mut steps);
    reject_cycles(&steps)?;

    Ok(Plan {
        plan_id,
        goal: obj
            .get("goal")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        created_ts,
        status: PlanStatus::New,
        steps,
        checkpoints: Vec::new(),
    })
}

fn normalize_full_steps(steps_val: &Value, plan_id: &str) -> Result<Vec<Step>> {
    let arr = steps_val
        .as_array()
        .ok_or_else(|| Error::InvalidSteps("steps must be an array".into()))?;

    let mut out = Vec::with_capacity(arr.len());
    for (index, raw_step) in arr.iter().enumerate() {
        out.push(normalize_one_step(raw_step, plan_id, index)?);
    }
    Ok(out)
}

fn normalize_one_step(raw_step: &Value, plan_id: &str, index: usize) -> Result<Step> {
    let obj = raw_step
        .as_object()
        .ok_or_else(|| Error::InvalidSteps(format!("step {index} is not an object")))?;

    let title = obj
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let title = truncate_chars(&title, MAX_TITLE_CHARS);

    let id = match obj.get("id").and_then(Value::as_str) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => {
            let seed = format!("{plan_id}|{index}|{}", truncate_chars(&title, 50));
            short_hash(&seed, 16)
        }
    };

    let declared_type = match obj.get("type").and_then(Value::as_str) {
        Some("tool") => StepType::Tool,
        Some("llm") => StepType::Llm,
        Some("note") => StepType::Note,
        _ => StepType::Note,
    };

    let depends_on = obj
        .get("depends_on")
        .map(coerce_string_list)
        .unwrap_or_default();

    let tool = if declared_type == StepType::Tool {
        obj.get("tool").and_then(|t| {
            let tobj = t.as_object()?;
            Some(StepTool {
                name: tobj.get("name")?.as_str()?.to_string(),
                method: tobj.get("method")?.as_str()?.to_string(),
                args: tobj.get("args").cloned().unwrap_or(Value::Object(Default::default())),
            })
        })
    } else {
        None
    };

    // A `type=tool` step with no valid `tool` object carries no work to run;
    // demote it to `note` so it never reaches the ready-batch path instead
    // of becoming a step the scheduler can never execute.
    let step_type = if declared_type == StepType::Tool && tool.is_none() {
        StepType::Note
    } else {
        declared_type
    };

    let prompt = if step_type == StepType::Llm {
        obj.get("prompt")
            .and_then(Value::as_str)
            .map(|s| truncate_chars(s, MAX_PROMPT_CHARS))
    } else {
        None
    };

    Ok(Step {
        id,
        title,
        step_type,
        depends_on,
        tool,
        prompt,
        status: StepStatus::Pending,
        result: None,
    })
}

/// Convert the `{tool_calls:[...], final: string}` shorthand into one tool
/// step per call plus a terminal `note` step named `"final"` depending on
/// every tool step.
fn normalize_tool_calls_dialect(
    obj: &serde_json::Map<String, Value>,
    plan_id: &str,
) -> Result<Vec<Step>> {
    let calls = obj
        .get("tool_calls")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::InvalidSteps("tool_calls must be an array".into()))?;

    let mut steps = Vec::with_capacity(calls.len() + 1);
    let mut tool_step_ids = Vec::with_capacity(calls.len());

    for (index, call) in calls.iter().enumerate() {
        let cobj = call
            .as_object()
            .ok_or_else(|| Error::InvalidSteps(format!("tool_calls[{index}] is not an object")))?;
        let name = cobj
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidSteps(format!("tool_calls[{index}] missing name")))?
            .to_string();
        let method = cobj
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let args = cobj.get("args").cloned().unwrap_or(Value::Object(Default::default()));

        let title = truncate_chars(&format!("{name}.{method}"), MAX_TITLE_CHARS);
        let seed = format!("{plan_id}|{index}|{}", truncate_chars(&title, 50));
        let id = short_hash(&seed, 16);
        tool_step_ids.push(id.clone());

        steps.push(Step {
            id,
            title,
            step_type: StepType::Tool,
            depends_on: Vec::new(),
            tool: Some(StepTool { name, method, args }),
            prompt: None,
            status: StepStatus::Pending,
            result: None,
        });
    }

    let final_seed = format!("{plan_id}|{}|final", calls.len());
    steps.push(Step {
        id: short_hash(&final_seed, 16),
        title: "final".into(),
        step_type: StepType::Note,
        depends_on: tool_step_ids,
        tool: None,
        prompt: obj.get("final").and_then(Value::as_str).map(String::from),
        status: StepStatus::Pending,
        result: None,
    });

    Ok(steps)
}

fn coerce_string_list(v: &Value) -> Vec<String> {
    match v.as_array() {
        Some(arr) => arr
            .iter()
            .filter_map(|e| e.as_str().map(String::from))
            .collect(),
        None => Vec::new(),
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

fn short_hash(seed: &str, len: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    let digest = hasher.finalize();
    let hex = hex_encode(&digest);
    hex.chars().take(len).collect()
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// Resolve id collisions by appending the step's index and rehashing until
/// unique.
fn dedupe_step_ids(steps: &mut [Step], plan_id: &str) {
    let mut seen: HashSet<String> = HashSet::new();
    for (index, step) in steps.iter_mut().enumerate() {
        while seen.contains(&step.id) {
            let seed = format!("{plan_id}|{index}|{}|collision", step.id);
            step.id = short_hash(&seed, 16);
        }
        seen.insert(step.id.clone());
    }
}

/// Drop `depends_on` entries that reference an id not present in the plan;
/// this keeps normalize() permissive (only format-level violations and
/// step-count overruns are hard failures).
fn drop_dangling_dependencies(steps: &mut [Step]) {
    let ids: HashSet<String> = steps.iter().map(|s| s.id.clone()).collect();
    for step in steps.iter_mut() {
        step.depends_on.retain(|d| ids.contains(d));
    }
}

fn reject_cycles(steps: &[Step]) -> Result<()> {
    let index_of: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    let mut marks = vec![Mark::Unvisited; steps.len()];

    fn visit(
        i: usize,
        steps: &[Step],
        index_of: &HashMap<&str, usize>,
        marks: &mut [Mark],
    ) -> Result<()> {
        match marks[i] {
            Mark::Done => return Ok(()),
            Mark::InProgress => {
                return Err(Error::InvalidSteps(format!(
                    "dependency cycle detected at step '{}'",
                    steps[i].id
                )))
            }
            Mark::Unvisited => {}
        }
        marks[i] = Mark::InProgress;
        for dep in &steps[i].depends_on {
            if let Some(&j) = index_of.get(dep.as_str()) {
                visit(j, steps, index_of, marks)?;
            }
        }
        marks[i] = Mark::Done;
        Ok(())
    }

    for i in 0..steps.len() {
        visit(i, steps, &index_of, &mut marks)?;
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scheduler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ToolBatch {
    pub ok: bool,
    pub tool_calls: Vec<ToolCall>,
    pub remaining: usize,
}

/// Extract the next ready batch of tool calls. Pure: depends only on
/// `plan`'s step statuses and dependency edges, never on wall-clock time.
pub fn get_ready_tool_batch(plan: &Plan, batch_size: usize) -> ToolBatch {
    let batch_size = batch_size.min(200);
    let done_ids = plan.done_step_ids();

    let ready_indices: Vec<usize> = plan
        .steps
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_ready(&done_ids))
        .map(|(i, _)| i)
        .collect();

    let taken = ready_indices.len().min(batch_size);
    let tool_calls = ready_indices[..taken]
        .iter()
        .map(|&i| {
            let step = &plan.steps[i];
            let tool = step.tool.as_ref().expect("ready step must carry tool spec");
            ToolCall {
                name: tool.name.clone(),
                method: tool.method.clone(),
                args: tool.args.clone(),
                step_id: Some(step.id.clone()),
            }
        })
        .collect();

    ToolBatch {
        ok: true,
        tool_calls,
        remaining: ready_indices.len() - taken,
    }
}

/// Apply a batch of tool results to a plan, returning a new `Plan` value.
/// Preferred matching is by `_step_id`; when absent, falls back to the
/// first pending tool step whose `(name, method)` matches.
pub fn apply_tool_results(plan: &Plan, results: &[ToolResult]) -> Plan {
    let mut next = plan.clone();

    for result in results {
        let target_index = result
            .step_id
            .as_deref()
            .and_then(|id| next.step_index(id))
            .or_else(|| {
                next.steps.iter().position(|s| {
                    s.status == StepStatus::Pending
                        && s.step_type == StepType::Tool
                        && s.tool
                            .as_ref()
                            .map(|t| t.name == result.name && t.method == result.method)
                            .unwrap_or(false)
                })
            });

        if let Some(i) = target_index {
            let step = &mut next.steps[i];
            if result.ok {
                step.status = StepStatus::Done;
                step.result = result.result.clone();
            } else {
                step.status = StepStatus::Failed;
                step.result = result
                    .details
                    .clone()
                    .or_else(|| Some(serde_json::json!({"error": result.error})));
            }
        }
    }

    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_full_plan_dialect() {
        let raw = json!({
            "plan_id": "p1",
            "goal": "do a thing",
            "steps": [
                {"id": "s1", "title": "step one", "type": "tool",
                 "tool": {"name": "ping", "method": "get", "args": {}}},
                {"title": "finish up", "type": "note", "depends_on": ["s1"]}
            ]
        });
        let plan = normalize(&raw, 0.0).unwrap();
        assert_eq!(plan.plan_id, "p1");
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].id, "s1");
        assert!(!plan.steps[1].id.is_empty());
        assert_eq!(plan.steps[1].depends_on, vec!["s1".to_string()]);
    }

    #[test]
    fn normalizes_tool_calls_dialect_with_final_step() {
        let raw = json!({
            "tool_calls": [{"name": "ping", "method": "get", "args": {}}],
            "final": "done"
        });
        let plan = normalize(&raw, 0.0).unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].step_type, StepType::Tool);
        assert_eq!(plan.steps[1].title, "final");
        assert_eq!(plan.steps[1].depends_on, vec![plan.steps[0].id.clone()]);
    }

    #[test]
    fn missing_plan_id_is_derived_deterministically() {
        let raw = json!({"steps": []});
        let a = normalize(&raw, 0.0).unwrap();
        let b = normalize(&raw, 0.0).unwrap();
        assert_eq!(a.plan_id, b.plan_id);
        assert_eq!(a.plan_id.len(), 16);
    }

    #[test]
    fn unknown_step_type_coerces_to_note() {
        let raw = json!({"steps": [{"id": "s1", "title": "x", "type": "bogus"}]});
        let plan = normalize(&raw, 0.0).unwrap();
        assert_eq!(plan.steps[0].step_type, StepType::Note);
    }

    #[test]
    fn duplicate_ids_are_rewritten() {
        let raw = json!({"steps": [
            {"id": "dup", "title": "a", "type": "note"},
            {"id": "dup", "title": "b", "type": "note"}
        ]});
        let plan = normalize(&raw, 0.0).unwrap();
        assert_ne!(plan.steps[0].id, plan.steps[1].id);
    }

    #[test]
    fn too_many_steps_rejected() {
        let steps: Vec<Value> = (0..MAX_STEPS + 1)
            .map(|i| json!({"id": format!("s{i}"), "title": "x", "type": "note"}))
            .collect();
        let raw = json!({"steps": steps});
        let err = normalize(&raw, 0.0).unwrap_err();
        assert!(matches!(err, Error::TooManySteps));
    }

    #[test]
    fn cycle_is_rejected() {
        let raw = json!({"steps": [
            {"id": "a", "title": "a", "type": "tool",
             "tool": {"name": "ping", "method": "get"}, "depends_on": ["b"]},
            {"id": "b", "title": "b", "type": "tool",
             "tool": {"name": "ping", "method": "get"}, "depends_on": ["a"]}
        ]});
        let err = normalize(&raw, 0.0).unwrap_err();
        assert!(matches!(err, Error::InvalidSteps(_)));
    }

    #[test]
    fn dangling_dependency_is_dropped_not_rejected() {
        let raw = json!({"steps": [
            {"id": "a", "title": "a", "type": "note", "depends_on": ["ghost"]}
        ]});
        let plan = normalize(&raw, 0.0).unwrap();
        assert!(plan.steps[0].depends_on.is_empty());
    }

    #[test]
    fn non_object_plan_is_unsupported_format() {
        let raw = json!([1, 2, 3]);
        let err = normalize(&raw, 0.0).unwrap_err();
        assert!(matches!(err, Error::UnsupportedPlanFormat));
    }

    fn tool_step(id: &str, depends_on: Vec<&str>) -> Step {
        Step {
            id: id.into(),
            title: id.into(),
            step_type: StepType::Tool,
            depends_on: depends_on.into_iter().map(String::from).collect(),
            tool: Some(StepTool {
                name: "ping".into(),
                method: "get".into(),
                args: json!({}),
            }),
            prompt: None,
            status: StepStatus::Pending,
            result: None,
        }
    }

    #[test]
    fn ready_batch_respects_dependencies() {
        let plan = Plan {
            plan_id: "p".into(),
            goal: "g".into(),
            created_ts: 0.0,
            status: PlanStatus::Running,
            steps: vec![tool_step("a", vec![]), tool_step("b", vec!["a"])],
            checkpoints: vec![],
        };
        let batch = get_ready_tool_batch(&plan, 200);
        assert_eq!(batch.tool_calls.len(), 1);
        assert_eq!(batch.tool_calls[0].step_id.as_deref(), Some("a"));
        assert_eq!(batch.remaining, 0);
    }

    #[test]
    fn apply_tool_results_is_order_independent_across_batch_sizes() {
        let plan = Plan {
            plan_id: "p".into(),
            goal: "g".into(),
            created_ts: 0.0,
            status: PlanStatus::Running,
            steps: vec![tool_step("a", vec![]), tool_step("b", vec!["a"])],
            checkpoints: vec![],
        };

        // batch_size = 1: two sequential rounds.
        let batch1 = get_ready_tool_batch(&plan, 1);
        let results1 = vec![ToolResult::ok("ping", "get", json!({"pong": true}))
            .with_step_id(batch1.tool_calls[0].step_id.clone())];
        let after1 = apply_tool_results(&plan, &results1);
        let batch2 = get_ready_tool_batch(&after1, 1);
        let results2 = vec![ToolResult::ok("ping", "get", json!({"pong": true}))
            .with_step_id(batch2.tool_calls[0].step_id.clone())];
        let final_small = apply_tool_results(&after1, &results2);

        // batch_size = 200: one round covering both steps once "a" is done.
        let batch_big = get_ready_tool_batch(&plan, 200);
        let results_big = vec![ToolResult::ok("ping", "get", json!({"pong": true}))
            .with_step_id(batch_big.tool_calls[0].step_id.clone())];
        let after_big = apply_tool_results(&plan, &results_big);
        let batch_big2 = get_ready_tool_batch(&after_big, 200);
        let results_big2 = vec![ToolResult::ok("ping", "get", json!({"pong": true}))
            .with_step_id(batch_big2.tool_calls[0].step_id.clone())];
        let final_big = apply_tool_results(&after_big, &results_big2);

        assert_eq!(
            final_small.steps.iter().map(|s| s.status).collect::<Vec<_>>(),
            final_big.steps.iter().map(|s| s.status).collect::<Vec<_>>()
        );
    }

    #[test]
    fn apply_tool_results_marks_failure() {
        let plan = Plan {
            plan_id: "p".into(),
            goal: "g".into(),
            created_ts: 0.0,
            status: PlanStatus::Running,
            steps: vec![tool_step("a", vec![])],
            checkpoints: vec![],
        };
        let result = ToolResult::err(
            "ping",
            "get",
            sa_domain::tool::ToolErrorKind::ToolException,
            json!({"message": "boom"}),
        )
        .with_step_id(Some("a".into()));
        let next = apply_tool_results(&plan, &[result]);
        assert_eq!(next.steps[0].status, StepStatus::Failed);
    }
}
