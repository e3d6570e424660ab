//! Two-phase startup: build every service `AppState` needs, then spawn the
//! handful of background tasks the running server keeps alive.

use std::sync::Arc;
use std::time::Instant;

use sa_checkpoint::CheckpointStore;
use sa_config::RuntimeConfig;
use sa_context::ContextAssembler;
use sa_convlog::ConversationLog;
use sa_llm::LlmClient;
use sa_metrics::{Metrics, RequestLogWriter};
use sa_orchestrator::Orchestrator;
use sa_semindex::SemanticIndex;
use sa_tools::providers::baseline::{EchoProvider, PingProvider};
use sa_tools::providers::exec::ExecProvider;
use sa_tools::providers::file::FileProvider;
use sa_tools::providers::http::HttpFetchProvider;
use sa_tools::ToolRouter;

use crate::admission::RateLimiter;
use crate::state::AppState;

/// Build every long-lived service and assemble them into `AppState`.
/// Does not spawn anything; callers decide when background work starts.
pub async fn build_app_state(config: RuntimeConfig) -> anyhow::Result<AppState> {
    let config = Arc::new(config);

    let checkpoints = CheckpointStore::new(config.paths.checkpoint_dir());
    let convlog = ConversationLog::new(config.paths.conversation_log_dir());
    let semindex = SemanticIndex::open(&config.paths.semantic_index_path()).await?;
    let context = ContextAssembler::new(
        config.context.episodic_turns,
        config.context.semantic_top_k,
        config.context.snippet_max_chars,
        config.context.budget_chars,
    );

    let mut tools = ToolRouter::new();
    tools.register(Box::new(PingProvider));
    tools.register(Box::new(EchoProvider));
    tools.register(Box::new(HttpFetchProvider::new(
        config.http_fetcher.allowlist.clone(),
        config.http_fetcher.default_timeout_sec,
        config.http_fetcher.default_max_bytes,
        config.http_fetcher.default_max_text_chars,
    )));
    tools.register(Box::new(ExecProvider::new(
        config.exec.executable_allowlist.clone(),
        config.exec.default_timeout_sec,
        config.exec.max_output_bytes,
        config.exec.base_dir.clone(),
    )));
    tools.register(Box::new(FileProvider::new(config.exec.base_dir.clone())));

    let llm = Arc::new(LlmClient::new(
        config.llm.base_url.clone(),
        config.llm.model_id.clone(),
        config.llm.timeout_sec,
    ));

    let orchestrator = Arc::new(Orchestrator {
        checkpoints,
        convlog,
        semindex,
        context,
        tools,
        llm: llm.clone(),
        tool_batch_size: 200,
    });

    let metrics = Arc::new(Metrics::new(config.admission.max_inflight_chats as i64));
    let request_log = Arc::new(RequestLogWriter::new(config.paths.request_log_path()));
    let rate_limiter = Arc::new(RateLimiter::new(
        config.admission.rate_limit_requests,
        config.admission.rate_limit_window_s,
        config.admission.rate_limit_max_keys,
    ));

    Ok(AppState {
        config,
        orchestrator,
        llm,
        metrics,
        request_log,
        rate_limiter,
        started_at: Instant::now(),
    })
}

/// Spawn the background tasks a running server keeps alive. Currently just
/// the best-effort LLM warmup run at startup — this system has no
/// session-flush, schedule-runner, or delivery-retry equivalents.
pub fn spawn_background_tasks(state: &AppState) {
    let llm = state.llm.clone();
    tokio::spawn(async move {
        llm.run_warmup().await;
    });
}
