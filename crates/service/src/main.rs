use std::sync::Arc;

use anyhow::Result;
use bidbroker_core::config::{AppConfig, LoadOptions};
use bidbroker_service::{init_logging, BrokerService, SweepScheduler};
use bidbroker_store::InMemoryBrokerStore;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config.logging)?;

    let store = Arc::new(InMemoryBrokerStore::default());
    let service = Arc::new(BrokerService::from_config(store, &config));
    let scheduler = SweepScheduler::from_config(service, &config.sweeper);

    tracing::info!(
        event_name = "system.sweeper_host.started",
        correlation_id = "bootstrap",
        sweeper_enabled = config.sweeper.enabled,
        budget_tolerance_pct = config.policy.budget_tolerance_pct,
        "bidbroker sweeper host started"
    );
    tokio::signal::ctrl_c().await?;
    tracing::info!(
        event_name = "system.sweeper_host.stopping",
        correlation_id = "shutdown",
        "bidbroker sweeper host stopping"
    );

    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await;
    }
    Ok(())
}
