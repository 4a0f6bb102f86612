use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::api::health::SyncHealth;
use crate::config::{Config, IMPORT_BATCH_SIZE};
use crate::db::{all_performance, all_players, all_prices, Store};
use crate::error::AppError;
use crate::fetcher::TokenPriceClient;
use crate::import::{apply_plan, parse_performance_matrix, plan_import, read_csv, ImportSummary};
use crate::matching::{MatchPolicy, MatchStrategy, Reconciler};
use crate::price_sync::sync_prices;
use crate::stats::{cumulative_tp, rank_players, CumulativePoint, PlayerSummary, RankedPlayer, RankingMetric};
use crate::types::{Performance, Player, Price, PriceFilter};

/// Default price-history window for the player detail view.
pub const DEFAULT_HISTORY_DAYS: i64 = 30;
pub const DEFAULT_RANKING_LIMIT: usize = 50;
const TOP_PLAYERS: usize = 10;

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn Store>,
    pub cfg: Arc<Config>,
    pub prices: TokenPriceClient,
    pub health: Arc<SyncHealth>,
}

pub fn router(state: ApiState) -> Router {
    let mut app = Router::new()
        .route("/health", get(get_health))
        .route("/players", get(get_players))
        .route("/players/:id", get(get_player_detail))
        .route("/rankings", get(get_rankings))
        .route("/stats/summary", get(get_stats_summary))
        .route("/api/cron/fetch-prices", get(fetch_prices).post(fetch_prices));

    if state.cfg.admin_token.is_some() {
        app = app.route("/admin/performance", post(upload_performance));
    }

    app.with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct DetailQuery {
    pub days: Option<i64>,
}

#[derive(Deserialize)]
pub struct RankingsQuery {
    pub metric: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct UploadQuery {
    pub dry_run: Option<bool>,
    pub strategy: Option<String>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub players: usize,
    pub last_price_sync: Option<DateTime<Utc>>,
    pub last_sync_count: u64,
    pub sync_failures: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlayerDetail {
    pub player: Player,
    pub summary: PlayerSummary,
    pub prices: Vec<Price>,
    pub performance: Vec<Performance>,
    pub cumulative_tp: Vec<CumulativePoint>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SummaryResponse {
    pub players: usize,
    pub total_market_cap: f64,
    pub total_tp: f64,
    pub top_by_market_cap: Vec<RankedPlayer>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CronResponse {
    pub success: bool,
    pub message: String,
    pub count: usize,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn bearer_matches(headers: &HeaderMap, expected: &str) -> bool {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token.trim() == expected)
}

/// Summaries for every player, built from full price history and all performance rows.
async fn load_summaries(state: &ApiState) -> Result<Vec<PlayerSummary>, AppError> {
    let store = state.store.as_ref();
    let page_size = state.cfg.page_size;

    let players = all_players(store, page_size).await?;
    let mut prices: HashMap<i64, Vec<Price>> = HashMap::new();
    for p in all_prices(store, PriceFilter::default(), page_size).await? {
        prices.entry(p.player_id).or_default().push(p);
    }
    let mut perfs: HashMap<i64, Vec<Performance>> = HashMap::new();
    for p in all_performance(store, None, page_size).await? {
        perfs.entry(p.player_id).or_default().push(p);
    }

    Ok(players
        .iter()
        .map(|player| {
            PlayerSummary::build(
                player,
                prices.get(&player.id).map(Vec::as_slice).unwrap_or_default(),
                perfs.get(&player.id).map(Vec::as_slice).unwrap_or_default(),
            )
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Result<Json<HealthResponse>, AppError> {
    let players = all_players(state.store.as_ref(), state.cfg.page_size).await?.len();
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        players,
        last_price_sync: state.health.last_sync_at(),
        last_sync_count: state.health.last_sync_count(),
        sync_failures: state.health.consecutive_failures(),
    }))
}

async fn get_players(State(state): State<ApiState>) -> Result<Json<Vec<PlayerSummary>>, AppError> {
    Ok(Json(load_summaries(&state).await?))
}

async fn get_player_detail(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Query(params): Query<DetailQuery>,
) -> Result<Json<PlayerDetail>, AppError> {
    let store = state.store.as_ref();
    let page_size = state.cfg.page_size;

    let player = store
        .get_player(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("player {id}")))?;

    let history = all_prices(store, PriceFilter { player_id: Some(id), since: None }, page_size).await?;
    let performance = all_performance(store, Some(id), page_size).await?;
    let summary = PlayerSummary::build(&player, &history, &performance);

    let days = params.days.unwrap_or(DEFAULT_HISTORY_DAYS);
    let prices = if days > 0 {
        let since = Utc::now() - chrono::Duration::days(days);
        history.into_iter().filter(|p| p.fetched_at >= since).collect()
    } else {
        history
    };

    Ok(Json(PlayerDetail {
        cumulative_tp: cumulative_tp(&performance),
        player,
        summary,
        prices,
        performance,
    }))
}

async fn get_rankings(
    State(state): State<ApiState>,
    Query(params): Query<RankingsQuery>,
) -> Result<Json<Vec<RankedPlayer>>, AppError> {
    let metric = match params.metric.as_deref() {
        Some(m) => m.parse::<RankingMetric>().map_err(AppError::BadRequest)?,
        None => RankingMetric::default(),
    };
    let limit = params.limit.unwrap_or(DEFAULT_RANKING_LIMIT);

    let mut ranked = rank_players(load_summaries(&state).await?, metric);
    ranked.truncate(limit);
    Ok(Json(ranked))
}

async fn get_stats_summary(State(state): State<ApiState>) -> Result<Json<SummaryResponse>, AppError> {
    let summaries = load_summaries(&state).await?;
    let players = summaries.len();
    let total_market_cap = summaries.iter().filter_map(|s| s.market_cap).sum();
    let total_tp = summaries.iter().map(|s| s.total_tp).sum();

    let mut top_by_market_cap = rank_players(summaries, RankingMetric::MarketCap);
    top_by_market_cap.truncate(TOP_PLAYERS);

    Ok(Json(SummaryResponse { players, total_market_cap, total_tp, top_by_market_cap }))
}

async fn fetch_prices(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    if let Some(secret) = state.cfg.cron_secret.as_deref() {
        if !bearer_matches(&headers, secret) {
            return AppError::Unauthorized.into_response();
        }
    }

    match sync_prices(state.store.as_ref(), &state.prices, state.cfg.page_size).await {
        Ok(report) => {
            state.health.record_success(report.timestamp, report.count);
            Json(CronResponse {
                success: true,
                message: format!("Stored prices for {} players", report.count),
                count: report.count,
                timestamp: report.timestamp,
            })
            .into_response()
        }
        Err(e) => {
            error!("Cron price fetch failed: {e}");
            state.health.record_failure();
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "success": false, "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn upload_performance(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(params): Query<UploadQuery>,
    body: String,
) -> Result<Json<ImportSummary>, AppError> {
    let token = state
        .cfg
        .admin_token
        .as_deref()
        .ok_or_else(|| AppError::NotFound("admin upload is disabled".to_string()))?;
    if !bearer_matches(&headers, token) {
        return Err(AppError::Unauthorized);
    }

    let strategy = match params.strategy.as_deref() {
        Some(s) => s.parse::<MatchStrategy>().map_err(AppError::BadRequest)?,
        None => MatchStrategy::default(),
    };
    let dry_run = params.dry_run.unwrap_or(false);

    let sheet = read_csv(body.as_bytes()).map_err(|e| AppError::BadRequest(e.to_string()))?;
    let parsed = parse_performance_matrix(&sheet)?;

    let players = all_players(state.store.as_ref(), state.cfg.page_size).await?;
    let policy = MatchPolicy { max_distance: state.cfg.match_max_distance };
    let plan = plan_import(&parsed, &Reconciler::new(&players, strategy, policy));

    let outcome = if dry_run {
        None
    } else {
        Some(apply_plan(state.store.as_ref(), &plan, IMPORT_BATCH_SIZE).await)
    };

    info!(
        records = parsed.records.len(),
        accepted = plan.accepted.len(),
        rejected = parsed.rejected.len(),
        unmatched = plan.report.unmatched.len(),
        dry_run,
        "Performance upload processed"
    );
    Ok(Json(ImportSummary::new(&parsed, &plan, outcome)))
}
