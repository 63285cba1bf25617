use anyhow::Context;
use docstore_cache::observability::{init_tracing, HealthStatus};
use docstore_cache::{Config, DocumentCache};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing().context("initializing tracing")?;

    let config = Config::from_env().context("loading configuration")?;
    info!("Starting docstore-cache {}", env!("CARGO_PKG_VERSION"));

    let cache = DocumentCache::connect(config).await.context("connecting backing stores")?;

    let report = cache.health.check().await;
    match report.status {
        HealthStatus::Healthy => info!("Backing stores healthy"),
        _ => warn!("Backing stores not fully healthy: {}", serde_json::to_string(&report)?),
    }

    let listener = cache
        .invalidation_listener()
        .await
        .context("subscribing to invalidations")?;

    listener
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    info!("docstore-cache stopped");
    Ok(())
}
