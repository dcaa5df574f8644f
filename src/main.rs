use std::sync::Arc;

use anyhow::Result;
use microanalytics_forecast::{api, config::Config, repo::SalesStore, telemetry};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    let cfg = Config::load()?;
    let store = sales_store(&cfg).await?;
    let state = api::AppState::build(&cfg, store)?;
    let app = api::router(state, &cfg);

    let addr = cfg.server.socket_addr()?;
    if cfg.server.host == "0.0.0.0" {
        warn!("binding to 0.0.0.0 - the forecasting API will be reachable from the network");
    }
    info!(%addr, cache_root = %cfg.cache.root.display(), "starting MicroAnalytics forecast service");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await?;

    warn!("shutdown complete");
    Ok(())
}

#[cfg(feature = "db")]
async fn sales_store(cfg: &Config) -> Result<Arc<dyn SalesStore>> {
    use microanalytics_forecast::repo::pg::PgSalesStore;

    if cfg.db.url.is_empty() {
        anyhow::bail!("db.url (MAF__DB__URL) must be set when built with the db feature");
    }
    Ok(Arc::new(PgSalesStore::connect(&cfg.db.url).await?))
}

#[cfg(not(feature = "db"))]
async fn sales_store(_cfg: &Config) -> Result<Arc<dyn SalesStore>> {
    warn!("built without the db feature; serving from an empty in-memory store (synthetic history only)");
    Ok(Arc::new(microanalytics_forecast::repo::InMemorySalesStore::new()))
}
