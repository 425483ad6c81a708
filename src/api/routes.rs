//! HTTP route handlers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::agents::ConciergeWorkflow;
use crate::config::{Config, PRESET_NAMES};
use crate::session::RegistryStats;
use crate::tools::{SearchBackend, ToolRegistry};
use crate::workflow::Orchestrator;

use super::chat;
use super::runs;
use super::types::*;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    /// Runs, events and the workflow factory
    pub orchestrator: Arc<Orchestrator>,
    /// Tools available to the default workflow
    pub tools: ToolRegistry,
    pub started_at: Instant,
}

impl AppState {
    /// Build the tool registry, workflow factory and orchestrator for `config`.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let tools = ToolRegistry::from_config(&config);
        let factory = ConciergeWorkflow::new(config.workflow.clone(), tools.clone())?;
        let orchestrator = Arc::new(Orchestrator::new(config.clone(), Arc::new(factory)));
        Ok(Self {
            config,
            orchestrator,
            tools,
            started_at: Instant::now(),
        })
    }
}

/// All routes, with CORS and request tracing.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/stats", get(get_stats))
        .route("/api/workflow", get(get_workflow))
        .route("/api/workflow/presets", get(list_presets))
        .route("/api/runs", post(runs::create_run))
        .route("/api/runs", get(runs::list_runs))
        .route("/api/runs/:id", get(runs::get_run))
        .route("/api/runs/:id/cancel", post(runs::cancel_run))
        .route("/api/runs/:id/stream", get(runs::stream_run))
        .route("/api/chat/completions", post(chat::chat_completions))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let state = Arc::new(AppState::new(config.clone())?);

    // Sweep often enough that retention is honoured to within a few seconds.
    let sweep_every = (config.run_retention / 4).clamp(Duration::from_secs(1), Duration::from_secs(60));
    let sweeper = state.orchestrator.spawn_sweeper(sweep_every);

    let app = router(Arc::clone(&state));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(
        "Server listening on {} (search backend: {}, cancel mode: {:?})",
        addr,
        SearchBackend::from_config(&config).label(),
        config.cancel_mode
    );

    // Setup graceful shutdown on SIGTERM/SIGINT
    let shutdown_state = Arc::clone(&state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal(shutdown_state).await;
        })
        .await?;

    sweeper.abort();
    Ok(())
}

/// Wait for a shutdown signal, then cancel everything still running.
async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, cancelling in-flight runs...");
    let cancelled = state.orchestrator.cancel_all().await;
    if cancelled == 0 {
        tracing::info!("No runs in flight");
    }
    tracing::info!("Graceful shutdown complete");
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        search_backend: SearchBackend::from_config(&state.config).label().to_string(),
        cancel_mode: format!("{:?}", state.config.cancel_mode).to_lowercase(),
        max_turns_per_run: state.config.max_turns_per_run,
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

/// Run statistics.
async fn get_stats(State(state): State<Arc<AppState>>) -> Json<RegistryStats> {
    Json(state.orchestrator.registry().stats().await)
}

/// Describe the default workflow.
async fn get_workflow(
    State(state): State<Arc<AppState>>,
) -> Result<Json<WorkflowResponse>, (axum::http::StatusCode, String)> {
    let internal = |e: String| (axum::http::StatusCode::INTERNAL_SERVER_ERROR, e);
    let factory = state.orchestrator.factory();
    let graph = factory
        .build(&Default::default())
        .map_err(|e| internal(e.to_string()))?;
    let config = factory
        .base_config()
        .cloned()
        .unwrap_or_else(|| state.config.workflow.clone());

    let c = &state.config;
    Ok(Json(WorkflowResponse {
        config,
        root: graph.root().to_string(),
        agents: graph.descriptors().into_iter().cloned().collect(),
        tools: graph.tools().list(),
        limits: WorkflowLimits {
            max_turns_per_run: c.max_turns_per_run,
            turn_timeout_secs: c.turn_timeout.as_secs(),
            max_concurrent_runs: c.max_concurrent_runs,
            tool_timeout_ms: c.tool_timeout.as_millis() as u64,
            retry_count: c.retry_count,
            retry_backoff_base_ms: c.retry_backoff_base.as_millis() as u64,
            run_retention_secs: c.run_retention.as_secs(),
        },
    }))
}

/// Named workflow presets.
async fn list_presets() -> Json<Vec<PresetInfo>> {
    Json(
        PRESET_NAMES
            .iter()
            .filter_map(|name| {
                crate::config::WorkflowConfig::preset(name).map(|config| PresetInfo {
                    id: name.to_string(),
                    config,
                })
            })
            .collect(),
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::WorkflowConfig;

    /// Offline app state with a small admission cap.
    pub(crate) fn test_state(max_concurrent_runs: usize) -> Arc<AppState> {
        let mut config = Config::new(WorkflowConfig::default());
        config.max_concurrent_runs = max_concurrent_runs;
        Arc::new(AppState::new(config).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let Json(health) = health(State(test_state(1))).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.search_backend, "offline");
        assert_eq!(health.cancel_mode, "abandon");
    }

    #[tokio::test]
    async fn test_workflow_description() {
        let Json(workflow) = get_workflow(State(test_state(1))).await.unwrap();
        assert_eq!(workflow.root, "research");
        assert_eq!(workflow.agents.len(), 3);
        assert!(workflow.agents.iter().any(|a| a.terminal && a.name == "synthesis"));
        assert_eq!(workflow.tools.len(), 4);
        assert_eq!(workflow.limits.max_turns_per_run, 12);
    }

    #[tokio::test]
    async fn test_presets_listed() {
        let Json(presets) = list_presets().await;
        let ids: Vec<&str> = presets.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, PRESET_NAMES.to_vec());
    }

    #[tokio::test]
    async fn test_stats_start_empty() {
        let Json(stats) = get_stats(State(test_state(1))).await;
        assert_eq!(stats.submitted, 0);
        assert_eq!(stats.success_rate, 0.0);
    }

    #[test]
    fn test_router_builds() {
        let _router = router(test_state(1));
    }
}
