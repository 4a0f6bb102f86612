use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tp_dashboard::api::{router, ApiState, SyncHealth};
use tp_dashboard::config::Config;
use tp_dashboard::db::{SqliteStore, Store};
use tp_dashboard::error::Result;
use tp_dashboard::fetcher::TokenPriceClient;
use tp_dashboard::price_sync::{PriceRefresher, RetentionJob};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let store: Arc<dyn Store> = Arc::new(SqliteStore::connect(&cfg.database_url).await?);
    let prices = TokenPriceClient::from_config(&cfg)?;
    let health = Arc::new(SyncHealth::new());

    // --- Background jobs ---
    if cfg.price_fetch_interval_secs > 0 {
        let refresher = PriceRefresher::new(
            Arc::clone(&store),
            prices.clone(),
            Duration::from_secs(cfg.price_fetch_interval_secs),
            cfg.page_size,
        )
        .with_health(Arc::clone(&health));
        tokio::spawn(async move { refresher.run().await });
        info!("Price refresher running every {}s", cfg.price_fetch_interval_secs);
    } else {
        info!("Price refresher disabled; relying on /api/cron/fetch-prices");
    }

    if cfg.price_retention_days > 0 {
        let retention = RetentionJob::new(Arc::clone(&store), cfg.price_retention_days);
        tokio::spawn(async move { retention.run().await });
        info!("Price retention: {} days", cfg.price_retention_days);
    }

    if cfg.cron_secret.is_none() {
        info!("CRON_SECRET not set; cron endpoint is unauthenticated");
    }
    if cfg.admin_token.is_some() {
        info!("Admin upload route enabled at /admin/performance");
    }

    // --- HTTP API server ---
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let api_state = ApiState {
        store,
        cfg: Arc::new(cfg),
        prices,
        health,
    };
    let app = router(api_state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
