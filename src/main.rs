mod core;
mod interfaces;
mod logging;

use std::sync::Arc;

use anyhow::Result;
use tokio_cron_scheduler::JobScheduler;
use tracing::{info, warn};

use crate::core::agent::{AgentApi, HttpAgentApi};
use crate::core::config::Config;
use crate::core::scheduler::SchedulerEngine;
use crate::core::store::Store;
use crate::core::vault::SecretsVault;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("opswatch: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    logging::init();

    let config = Config::from_env();
    let store = Arc::new(Store::open(&config.db_path).await?);
    let vault = Arc::new(SecretsVault::new(store.get_db()));
    vault.initialize().await?;

    let agent: Option<Arc<dyn AgentApi>> = match config.agent_url.clone() {
        Some(url) => Some(Arc::new(HttpAgentApi::new(url))),
        None => {
            warn!("OPSWATCH_AGENT_URL is not set; monitoring runs will fail until configured");
            None
        }
    };

    let engine = SchedulerEngine::new(store.clone(), vault.clone(), agent, &config);

    let cron = JobScheduler::new().await?;
    engine.register_cron(&cron).await?;
    cron.start().await?;
    info!("Schedule tick registered (every minute)");

    interfaces::web::serve(store, vault, engine, &config).await
}
