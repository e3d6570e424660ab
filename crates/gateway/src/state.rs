//! Shared application state passed to every API handler, grouped by
//! concern: core services, observability, admission control, lifetime.

use std::sync::Arc;
use std::time::Instant;

use sa_config::RuntimeConfig;
use sa_llm::LlmClient;
use sa_metrics::Metrics;
use sa_orchestrator::Orchestrator;

use crate::admission::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    // ── Core services ────────────────────────────────────────────────
    pub config: Arc<RuntimeConfig>,
    pub orchestrator: Arc<Orchestrator>,
    pub llm: Arc<LlmClient>,

    // ── Observability ────────────────────────────────────────────────
    pub metrics: Arc<Metrics>,
    pub request_log: Arc<sa_metrics::RequestLogWriter>,

    // ── Admission control ────────────────────────────────────────────
    pub rate_limiter: Arc<RateLimiter>,

    // ── Process lifetime ─────────────────────────────────────────────
    pub started_at: Instant,
}
