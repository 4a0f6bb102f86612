//! Correct stored display names against the sports-data API's canonical
//! names. Matches by id first, then by bounded edit distance.

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tp_dashboard::config::Config;
use tp_dashboard::db::{all_players, SqliteStore, Store};
use tp_dashboard::error::Result;
use tp_dashboard::fetcher::SportsDataClient;
use tp_dashboard::matching::{plan_renames, MatchPolicy};

#[derive(Parser)]
#[command(name = "fix_player_names")]
#[command(about = "Reconcile stored player names with the sports-data API")]
struct Args {
    /// Print the planned renames without applying them
    #[arg(long)]
    dry_run: bool,

    /// Accept name matches only below this edit distance (defaults to MATCH_MAX_DISTANCE)
    #[arg(long)]
    max_distance: Option<usize>,
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
        error!("Name fix failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config, args: Args) -> Result<()> {
    let canonical = SportsDataClient::from_config(&cfg)?.fetch_players().await?;
    let store = SqliteStore::connect(&cfg.database_url).await?;
    let stored = all_players(&store, cfg.page_size).await?;

    let policy = MatchPolicy { max_distance: args.max_distance.unwrap_or(cfg.match_max_distance) };
    let (renames, unmatched) = plan_renames(&stored, &canonical, policy);

    for r in &renames {
        match r.distance {
            Some(d) => info!("{}: {:?} -> {:?} (distance {d})", r.player_id, r.from, r.to),
            None => info!("{}: {:?} -> {:?} (by id)", r.player_id, r.from, r.to),
        }
    }
    for p in &unmatched {
        warn!("No canonical match for {} {:?}", p.id, p.display_name);
    }

    if args.dry_run {
        info!("Dry run: {} renames planned, {} unmatched", renames.len(), unmatched.len());
        return Ok(());
    }

    let mut applied = 0;
    for r in &renames {
        if store.rename_player(r.player_id, &r.to).await? {
            applied += 1;
        }
    }
    info!(applied, unmatched = unmatched.len(), "Player names updated");
    Ok(())
}
