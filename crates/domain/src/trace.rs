//! Typed domain tracing events, emitted at state-change points rather than
//! via ad-hoc `tracing::info!` calls scattered through call sites.

/// A domain-level event worth a structured trace line. Each variant emits
/// with a stable event name plus its own fields, so downstream JSON log
/// consumers can filter on `event`.
#[derive(Debug, Clone)]
pub enum TraceEvent<'a> {
    TurnStarted {
        session_id: &'a str,
        plan_id: Option<&'a str>,
    },
    PlanNormalized {
        plan_id: &'a str,
        steps: usize,
    },
    PlanNormalizeFailed {
        plan_id: &'a str,
        reason: &'a str,
    },
    CheckpointWritten {
        plan_id: &'a str,
        status: &'a str,
    },
    ToolDispatched {
        name: &'a str,
        method: &'a str,
        ok: bool,
    },
    WarmupCompleted {
        ok: bool,
        ms: u64,
    },
    TurnCompleted {
        session_id: &'a str,
        plan_id: &'a str,
        total_ms: u64,
    },
}

impl<'a> TraceEvent<'a> {
    pub fn emit(&self) {
        match self {
            TraceEvent::TurnStarted { session_id, plan_id } => {
                tracing::info!(event = "turn_started", session_id, ?plan_id);
            }
            TraceEvent::PlanNormalized { plan_id, steps } => {
                tracing::info!(event = "plan_normalized", plan_id, steps);
            }
            TraceEvent::PlanNormalizeFailed { plan_id, reason } => {
                tracing::warn!(event = "plan_normalize_failed", plan_id, reason);
            }
            TraceEvent::CheckpointWritten { plan_id, status } => {
                tracing::debug!(event = "checkpoint_written", plan_id, status);
            }
            TraceEvent::ToolDispatched { name, method, ok } => {
                tracing::info!(event = "tool_dispatched", name, method, ok);
            }
            TraceEvent::WarmupCompleted { ok, ms } => {
                tracing::info!(event = "warmup_completed", ok, ms);
            }
            TraceEvent::TurnCompleted {
                session_id,
                plan_id,
                total_ms,
            } => {
                tracing::info!(event = "turn_completed", session_id, plan_id, total_ms);
            }
        }
    }
}
