use anyhow::{Context, Result};
use match_engine::catalog::{CatalogProvider, JsonCatalogProvider};
use match_engine::jobs::{BatchScheduler, JsonLinesSink, ResultSink};
use match_engine::{metrics, EngineConfig, RunContext};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }

    // Configuration problems stop the run before any work starts
    let config = EngineConfig::from_env().context("Invalid configuration")?;

    let catalog_path = config
        .io
        .catalog_path
        .clone()
        .context("MATCH_CATALOG_PATH is required")?;
    let provider = JsonCatalogProvider::new(catalog_path);
    let snapshot = provider
        .load_snapshot()
        .await
        .context("Failed to load catalog snapshot")?;
    let users = provider.load_users().await.context("Failed to load users")?;

    let sink: Arc<dyn ResultSink> = match &config.io.results_path {
        Some(path) => Arc::new(
            JsonLinesSink::create(path)
                .await
                .with_context(|| format!("Failed to create {}", path.display()))?,
        ),
        None => Arc::new(JsonLinesSink::stdout()),
    };

    let ctx = Arc::new(RunContext::new(config, snapshot).await?);

    let control = ctx.control.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Received Ctrl-C, stopping after in-flight users");
                control.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });

    let scheduler = BatchScheduler::new(sink);
    let summary = scheduler.run(Arc::clone(&ctx), users).await;

    info!(
        summary = %serde_json::to_string(&summary).unwrap_or_default(),
        "Run summary"
    );
    debug!(metrics = %metrics::encode(&ctx.registry), "Run metrics");

    if !summary.is_complete() {
        warn!(
            users_skipped = summary.users_skipped,
            stop_reason = ?summary.stop_reason,
            "Run completed partially"
        );
    }
    Ok(())
}
