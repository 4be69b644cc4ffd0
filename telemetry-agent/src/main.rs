//! Telemetry Agent - samples host resource usage and ships it to a collector
//!
//! Configuration comes from `AGENT_*` environment variables, optionally
//! seeded from a `.env` file in the working directory.

use anyhow::{Context, Result};
use std::sync::Arc;
use telemetry_agent::link::MqttLink;
use telemetry_agent::{config, Agent, ConfigStore, MetricsCollector, SysinfoSampler};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("telemetry_agent=info")),
        )
        .init();

    // Missing .env is fine, the environment may already carry everything
    dotenvy::dotenv().ok();

    let store = Arc::new(ConfigStore::new());
    store
        .load(&config::raw_from_env())
        .context("Failed to load agent configuration")?;
    let config = store.current()?;

    info!(
        host_id = %config.host_id,
        interval = config.metrics_interval_seconds,
        endpoint = %config.collector_endpoint,
        "telemetry agent starting"
    );

    let collector = MetricsCollector::new(Arc::new(SysinfoSampler::new()));
    let link = MqttLink::connect(&config, store.clone())
        .context("Failed to connect to collector endpoint")?;

    let mut agent = Agent::new(store, collector, link);
    agent
        .run(shutdown_signal())
        .await
        .context("Agent execution failed")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
