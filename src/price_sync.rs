use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::api::SyncHealth;
use crate::config::RETENTION_INTERVAL_SECS;
use crate::db::{all_players, Store};
use crate::error::Result;
use crate::fetcher::{TokenPriceClient, TokenQuote};
use crate::stats::market_cap;
use crate::types::{NewPrice, Player};

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub count: usize,
    pub quotes: usize,
    /// Quote addresses that matched no player.
    pub unmatched_quotes: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Turn quotes into one price row per matched player. Quotes match by token address
/// (case-insensitive) first, then by symbol. Returns the rows and the unmatched addresses.
pub fn build_price_rows(
    players: &[Player],
    quotes: &[TokenQuote],
    fetched_at: DateTime<Utc>,
) -> (Vec<NewPrice>, Vec<String>) {
    let by_address: HashMap<String, &Player> = players
        .iter()
        .filter_map(|p| p.token_address.as_ref().map(|a| (a.to_lowercase(), p)))
        .collect();
    let by_symbol: HashMap<String, &Player> = players
        .iter()
        .filter_map(|p| p.token_symbol.as_ref().map(|s| (s.to_uppercase(), p)))
        .collect();

    let mut rows = Vec::new();
    let mut seen: HashSet<i64> = HashSet::new();
    let mut unmatched = Vec::new();

    for quote in quotes {
        let player = by_address.get(&quote.address.to_lowercase()).or_else(|| {
            quote.symbol.as_ref().and_then(|s| by_symbol.get(&s.to_uppercase()))
        });
        let Some(player) = player else {
            unmatched.push(quote.address.clone());
            continue;
        };
        if !seen.insert(player.id) {
            continue;
        }

        let cap = quote.market_cap.or_else(|| {
            player.circulating_shares.map(|shares| market_cap(quote.price_usd, shares))
        });
        rows.push(NewPrice {
            player_id: player.id,
            price: quote.price_usd,
            market_cap: cap,
            holders: quote.holders,
            fetched_at,
        });
    }

    (rows, unmatched)
}

/// Fetch current quotes and append one price row per matched player.
pub async fn sync_prices(store: &dyn Store, client: &TokenPriceClient, page_size: usize) -> Result<SyncReport> {
    let quotes = client.fetch_all().await?;
    let players = all_players(store, page_size).await?;
    let timestamp = Utc::now();

    let (rows, unmatched_quotes) = build_price_rows(&players, &quotes, timestamp);
    let count = if rows.is_empty() { 0 } else { store.insert_prices(&rows).await? };

    if !unmatched_quotes.is_empty() {
        warn!(unmatched = unmatched_quotes.len(), "Quotes without a matching player");
    }
    info!(count, quotes = quotes.len(), players = players.len(), "Price sync complete");

    Ok(SyncReport { count, quotes: quotes.len(), unmatched_quotes, timestamp })
}

// ---------------------------------------------------------------------------
// Background jobs
// ---------------------------------------------------------------------------

/// Runs the price sync on a fixed interval for deployments without an external cron.
pub struct PriceRefresher {
    store: Arc<dyn Store>,
    client: TokenPriceClient,
    every: Duration,
    page_size: usize,
    health: Option<Arc<SyncHealth>>,
}

impl PriceRefresher {
    pub fn new(store: Arc<dyn Store>, client: TokenPriceClient, every: Duration, page_size: usize) -> Self {
        Self { store, client, every, page_size, health: None }
    }

    /// Report each run's outcome to the shared /health state.
    pub fn with_health(mut self, health: Arc<SyncHealth>) -> Self {
        self.health = Some(health);
        self
    }

    pub async fn run(self) {
        let mut ticker = interval(self.every);
        loop {
            ticker.tick().await;
            match sync_prices(self.store.as_ref(), &self.client, self.page_size).await {
                Ok(report) => {
                    if let Some(h) = &self.health {
                        h.record_success(report.timestamp, report.count);
                    }
                }
                Err(e) => {
                    error!("Scheduled price sync failed: {e}");
                    if let Some(h) = &self.health {
                        h.record_failure();
                    }
                }
            }
        }
    }
}

/// Deletes price samples older than the retention window once a day.
pub struct RetentionJob {
    store: Arc<dyn Store>,
    retention_days: i64,
}

impl RetentionJob {
    pub fn new(store: Arc<dyn Store>, retention_days: i64) -> Self {
        Self { store, retention_days }
    }

    pub async fn run(self) {
        let mut ticker = interval(Duration::from_secs(RETENTION_INTERVAL_SECS));
        loop {
            ticker.tick().await;
            if let Err(e) = self.prune(Utc::now()).await {
                error!("Price retention cleanup failed: {e}");
            }
        }
    }

    pub async fn prune(&self, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = now - chrono::Duration::days(self.retention_days);
        let deleted = self.store.delete_prices_before(cutoff).await?;
        info!(deleted, cutoff = %cutoff, "Price retention cleanup complete");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{all_prices, MemoryStore};
    use crate::types::PriceFilter;
    use chrono::TimeZone;

    fn quote(address: &str, symbol: Option<&str>, price: f64) -> TokenQuote {
        TokenQuote {
            address: address.to_string(),
            symbol: symbol.map(str::to_string),
            name: None,
            price_usd: price,
            market_cap: None,
            holders: Some(7),
        }
    }

    fn players() -> Vec<Player> {
        vec![
            Player {
                token_address: Some("0xAAA".into()),
                circulating_shares: Some(1_000_000.0),
                ..Player::named(1, "Saka")
            },
            Player { token_symbol: Some("dias".into()), ..Player::named(2, "Dias") },
            Player::named(3, "No Token"),
        ]
    }

    #[test]
    fn matches_by_address_then_symbol() {
        let now = Utc::now();
        let quotes = vec![
            quote("0xaaa", None, 0.05),
            quote("0xbbb", Some("DIAS"), 0.2),
            quote("0xccc", Some("NOPE"), 1.0),
            quote("0xAAA", None, 0.06),
        ];
        let (rows, unmatched) = build_price_rows(&players(), &quotes, now);

        assert_eq!(rows.len(), 2, "one row per matched player");
        assert_eq!(rows[0].player_id, 1);
        assert!((rows[0].market_cap.unwrap() - 50_000.0).abs() < 1e-6);
        assert_eq!(rows[1].player_id, 2);
        assert_eq!(rows[1].market_cap, None);
        assert_eq!(unmatched, vec!["0xccc".to_string()]);
        assert!(rows.iter().all(|r| r.fetched_at == now));
    }

    #[tokio::test]
    async fn retention_prunes_old_samples() {
        let store = Arc::new(MemoryStore::with_players(players()));
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let sample = |days: i64| NewPrice {
            player_id: 1,
            price: 1.0,
            market_cap: None,
            holders: None,
            fetched_at: now - chrono::Duration::days(days),
        };
        store.insert_prices(&[sample(120), sample(91), sample(89), sample(1)]).await.unwrap();

        let job = RetentionJob::new(store.clone(), 90);
        assert_eq!(job.prune(now).await.unwrap(), 2);
        assert_eq!(all_prices(store.as_ref(), PriceFilter::default(), 10).await.unwrap().len(), 2);
    }
}
