use std::net::SocketAddr;

use anyhow::Context;
use axum::extract::connect_info::IntoMakeServiceWithConnectInfo;
use axum::middleware as axum_middleware;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use sa_config::{ConfigSeverity, RuntimeConfig};
use sa_gateway::{api, bootstrap, middleware, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    run_server().await
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sa_gateway=debug")),
        )
        .json()
        .init();
}

async fn run_server() -> anyhow::Result<()> {
    tracing::info!("local agent runtime starting");

    let config_path = std::env::var("AICORE_CONFIG_PATH").ok().map(std::path::PathBuf::from);
    let config = RuntimeConfig::load(config_path.as_deref());

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    let state = bootstrap::build_app_state(config).await.context("building app state")?;
    bootstrap::spawn_background_tasks(&state);

    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);

    let app = api::router()
        .layer(axum_middleware::from_fn_with_state(state.clone(), middleware::observe))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    tracing::info!(addr = %addr, "listening");

    let make_service: IntoMakeServiceWithConnectInfo<_, SocketAddr> =
        app.into_make_service_with_connect_info::<SocketAddr>();

    axum::serve(listener, make_service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

/// Waits for SIGINT or (on unix) SIGTERM so in-flight turns can drain
/// before the listener stops accepting new connections.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received, draining in-flight requests");
}
