//! Import a performance matrix (CSV or workbook) into the performance table.
//!
//! Runs parse -> validate -> reconcile -> batched upsert, logging rejected
//! rows, approximate name matches and unmatched names along the way.

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tp_dashboard::config::{Config, IMPORT_BATCH_SIZE};
use tp_dashboard::db::{all_players, SqliteStore};
use tp_dashboard::error::Result;
use tp_dashboard::import::{apply_plan, parse_performance_matrix, plan_import, read_sheet};
use tp_dashboard::matching::{MatchPolicy, MatchStrategy, Reconciler};

#[derive(Parser)]
#[command(name = "import_performance")]
#[command(about = "Import a player performance matrix into the database")]
struct Args {
    /// Path to a .csv or .xlsx performance matrix
    file: PathBuf,

    /// Parse, validate and reconcile without writing
    #[arg(long)]
    dry_run: bool,

    /// Name matching strategy: edit-distance or loose
    #[arg(long, default_value = "edit-distance")]
    strategy: MatchStrategy,

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

    match run(cfg, args).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(e) => {
            error!("Import failed: {e}");
            std::process::exit(1);
        }
    }
}

/// Returns false when some batches failed to write.
async fn run(cfg: Config, args: Args) -> Result<bool> {
    let sheet = read_sheet(&args.file)?;
    let parsed = parse_performance_matrix(&sheet)?;
    info!(
        dates = parsed.dates.len(),
        players = parsed.players,
        records = parsed.records.len(),
        rejected = parsed.rejected.len(),
        "Parsed {}",
        args.file.display()
    );
    for row in &parsed.rejected {
        warn!("Line {}: {}", row.line, row.reason);
    }

    let store = SqliteStore::connect(&cfg.database_url).await?;
    let players = all_players(&store, cfg.page_size).await?;
    let policy = MatchPolicy { max_distance: cfg.match_max_distance };
    let reconciler = Reconciler::new(&players, args.strategy, policy);
    let plan = plan_import(&parsed, &reconciler);

    for (name, player_id, distance) in &plan.report.approximate {
        warn!("Approximate match: {name:?} -> player {player_id} (distance {distance})");
    }
    if !plan.report.unmatched.is_empty() {
        warn!(
            "{} names need manual mapping: {}",
            plan.report.unmatched.len(),
            plan.report.unmatched.iter().cloned().collect::<Vec<_>>().join(", ")
        );
    }
    info!(
        matched = plan.report.matched_count(),
        unmatched = plan.report.unmatched.len(),
        accepted = plan.accepted.len(),
        "Reconciled against {} players",
        players.len()
    );

    if args.dry_run {
        info!("Dry run: {} records would be written", plan.accepted.len());
        return Ok(true);
    }

    let outcome = apply_plan(&store, &plan, args.batch_size).await;
    info!(
        written = outcome.written,
        batches = outcome.batches,
        failed = outcome.failed_batches.len(),
        "Import complete"
    );
    Ok(outcome.failed_batches.is_empty())
}
