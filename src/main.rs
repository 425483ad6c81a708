//! HealthFinder - HTTP Server Entry Point
//!
//! Starts the HTTP server that exposes the concierge workflow API.

use healthfinder::{api, config::Config};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "healthfinder=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Loaded configuration: workflow='{}', max_turns_per_run={}, max_concurrent_runs={}",
        config.workflow.name,
        config.max_turns_per_run,
        config.max_concurrent_runs
    );
    if config.web_search_offline {
        warn!("WEB_SEARCH_OFFLINE is set; web search serves curated results only");
    }

    // Start HTTP server
    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting server on {}", addr);

    api::serve(config).await?;

    Ok(())
}
