//! Pull the player list (with token info and share counts) from the
//! sports-data API and upsert it into the players table.

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tp_dashboard::config::{Config, IMPORT_BATCH_SIZE};
use tp_dashboard::db::{SqliteStore, Store};
use tp_dashboard::error::Result;
use tp_dashboard::fetcher::SportsDataClient;

#[derive(Parser)]
#[command(name = "import_players")]
#[command(about = "Import players from the sports-data API")]
struct Args {
    /// Fetch and report without writing
    #[arg(long)]
    dry_run: bool,

    /// Rows per upsert batch
    #[arg(long, default_value_t = IMPORT_BATCH_SIZE)]
    batch_size: usize,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
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

    if let Err(e) = run(cfg, args).await {
        error!("Player import failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config, args: Args) -> Result<()> {
    let client = SportsDataClient::from_config(&cfg)?;
    let players = client.fetch_players().await?;

    let with_token = players.iter().filter(|p| p.token_address.is_some()).count();
    let with_shares = players.iter().filter(|p| p.circulating_shares.is_some()).count();
    info!(
        players = players.len(),
        with_token,
        with_shares,
        "Fetched players from sports-data API"
    );

    if args.dry_run {
        for p in players.iter().take(10) {
            info!(
                "  {} {} ({}) token={}",
                p.id,
                p.display_name,
                p.team.as_deref().unwrap_or("?"),
                p.token_symbol.as_deref().unwrap_or("-")
            );
        }
        info!("Dry run: {} players would be written", players.len());
        return Ok(());
    }

    let store = SqliteStore::connect(&cfg.database_url).await?;
    let mut written = 0;
    for (i, batch) in players.chunks(args.batch_size.max(1)).enumerate() {
        written += store.upsert_players(batch).await?;
        info!("Upserted batch {}: {} players", i + 1, batch.len());
    }
    info!(written, "Player import complete");
    Ok(())
}
