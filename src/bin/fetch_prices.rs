//! One-shot price sync, the command-line twin of /api/cron/fetch-prices.

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tp_dashboard::config::Config;
use tp_dashboard::db::SqliteStore;
use tp_dashboard::error::Result;
use tp_dashboard::fetcher::TokenPriceClient;
use tp_dashboard::price_sync::sync_prices;

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
        error!("Price fetch failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    let store = SqliteStore::connect(&cfg.database_url).await?;
    let client = TokenPriceClient::from_config(&cfg)?;

    let report = sync_prices(&store, &client, cfg.page_size).await?;
    info!("Stored prices for {} players at {}", report.count, report.timestamp);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
