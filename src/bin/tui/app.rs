use std::time::Instant;

use serde::de::DeserializeOwned;
use tp_dashboard::api::routes::{HealthResponse, PlayerDetail, SummaryResponse};
use tp_dashboard::stats::{RankedPlayer, RankingMetric};

/// Rows requested from /rankings.
pub const RANKING_LIMIT: usize = 100;

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Connected,
    Error(String),
    Connecting,
}

pub struct AppState {
    pub status: ConnectionStatus,
    pub summary: Option<SummaryResponse>,
    pub health: Option<HealthResponse>,
    pub metric: RankingMetric,
    pub rankings: Vec<RankedPlayer>,
    /// Open player detail (from GET /players/:id).
    pub detail: Option<PlayerDetail>,
    pub last_refresh: Instant,
    pub base_url: String,
}

async fn get_json<T: DeserializeOwned>(client: &reqwest::Client, url: &str) -> Result<T, String> {
    let resp = client.get(url).send().await.map_err(|e| e.to_string())?;
    if !resp.status().is_success() {
        return Err(format!("{} from {url}", resp.status()));
    }
    resp.json::<T>().await.map_err(|e| format!("parse error: {e}"))
}

impl AppState {
    pub fn new(base_url: String) -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            summary: None,
            health: None,
            metric: RankingMetric::default(),
            rankings: Vec::new(),
            detail: None,
            last_refresh: Instant::now(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Advance to the next ranking metric, wrapping around.
    pub fn next_metric(&mut self) {
        let all = RankingMetric::ALL;
        let pos = all.iter().position(|m| *m == self.metric).unwrap_or(0);
        self.metric = all[(pos + 1) % all.len()];
    }

    pub fn player_at(&self, index: usize) -> Option<i64> {
        self.rankings.get(index).map(|r| r.summary.player_id)
    }

    pub fn showing_detail(&self) -> bool {
        self.detail.is_some()
    }

    pub fn close_detail(&mut self) {
        self.detail = None;
    }

    pub async fn fetch_detail(&mut self, client: &reqwest::Client, player_id: i64) {
        let url = format!("{}/players/{player_id}", self.base_url);
        match get_json::<PlayerDetail>(client, &url).await {
            Ok(detail) => self.detail = Some(detail),
            Err(e) => self.status = ConnectionStatus::Error(e),
        }
    }

    pub async fn refresh(&mut self, client: &reqwest::Client) {
        let summary_url = format!("{}/stats/summary", self.base_url);
        let rankings_url = format!("{}/rankings?metric={}&limit={RANKING_LIMIT}", self.base_url, self.metric);
        let health_url = format!("{}/health", self.base_url);

        let (summary, rankings, health) = tokio::join!(
            get_json::<SummaryResponse>(client, &summary_url),
            get_json::<Vec<RankedPlayer>>(client, &rankings_url),
            get_json::<HealthResponse>(client, &health_url),
        );

        match (summary, rankings) {
            (Ok(s), Ok(r)) => {
                self.summary = Some(s);
                self.rankings = r;
                self.status = ConnectionStatus::Connected;
                self.last_refresh = Instant::now();
                if let Ok(h) = health {
                    self.health = Some(h);
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                self.status = ConnectionStatus::Error(e);
                return;
            }
        }

        if let Some(id) = self.detail.as_ref().map(|d| d.player.id) {
            self.fetch_detail(client, id).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

pub fn format_usd(v: Option<f64>) -> String {
    match v {
        Some(x) if x.abs() >= 1_000_000.0 => format!("${:.2}M", x / 1_000_000.0),
        Some(x) if x.abs() >= 1_000.0 => format!("${:.1}K", x / 1_000.0),
        Some(x) if x.abs() >= 1.0 => format!("${x:.2}"),
        Some(x) => format!("${x:.4}"),
        None => "—".to_string(),
    }
}

pub fn format_pct(v: Option<f64>) -> String {
    match v {
        Some(x) => format!("{x:+.1}%"),
        None => "—".to_string(),
    }
}

pub fn format_num(v: Option<f64>, decimals: usize) -> String {
    v.map_or("—".to_string(), |x| format!("{x:.decimals$}"))
}

/// Ranking value rendered in the metric's own unit.
pub fn format_metric(metric: RankingMetric, v: Option<f64>) -> String {
    match metric {
        RankingMetric::MarketCap => format_usd(v),
        RankingMetric::PriceChange => format_pct(v),
        RankingMetric::TpRate => v.map_or("—".to_string(), |x| format!("{x:.1}%")),
        RankingMetric::TpPerDollar => format_num(v, 1),
        RankingMetric::Volatility => format_num(v, 2),
        RankingMetric::TotalTp | RankingMetric::AverageTp => format_num(v, 1),
    }
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}…")
    }
}
