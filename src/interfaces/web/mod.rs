mod auth;
mod handlers;
mod router;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::core::config::Config;
use crate::core::scheduler::SchedulerEngine;
use crate::core::store::Store;
use crate::core::vault::SecretsVault;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) store: Arc<Store>,
    pub(crate) vault: Arc<SecretsVault>,
    pub(crate) engine: Arc<SchedulerEngine>,
    pub(crate) api_host: String,
    pub(crate) internal_token: String,
}

/// Bind the API server and serve until shutdown.
pub async fn serve(
    store: Arc<Store>,
    vault: Arc<SecretsVault>,
    engine: Arc<SchedulerEngine>,
    config: &Config,
) -> Result<()> {
    let state = AppState {
        store,
        vault,
        engine,
        api_host: config.api_host.clone(),
        internal_token: config.internal_token.clone(),
    };

    let app = router::build_api_router(state);
    let addr = format!("{}:{}", config.api_host, config.api_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
