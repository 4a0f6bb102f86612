use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;

use crate::db::Store;
use crate::error::{AppError, Result};
use crate::types::{NewPrice, PageRequest, Performance, Player, Price, PriceFilter};

/// In-process store with the same ordering and key rules as [`super::SqliteStore`].
/// Backs the store, import, price-sync and HTTP tests.
///
/// Writes referencing an unknown player fail the whole call, mirroring the
/// foreign keys on the SQLite schema.
#[derive(Default)]
pub struct MemoryStore {
    players: DashMap<i64, Player>,
    prices: DashMap<i64, Price>,
    performance: DashMap<(i64, NaiveDate), Performance>,
    next_price_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_players(players: impl IntoIterator<Item = Player>) -> Self {
        let store = Self::new();
        for p in players {
            store.players.insert(p.id, p);
        }
        store
    }

    fn check_player(&self, player_id: i64) -> Result<()> {
        if self.players.contains_key(&player_id) {
            Ok(())
        } else {
            Err(AppError::BadRequest(format!("unknown player_id {player_id}")))
        }
    }
}

fn page_of<T>(rows: Vec<T>, page: PageRequest) -> Vec<T> {
    rows.into_iter().skip(page.offset).take(page.limit).collect()
}

#[async_trait]
impl Store for MemoryStore {
    async fn players_page(&self, page: PageRequest) -> Result<Vec<Player>> {
        let mut rows: Vec<Player> = self.players.iter().map(|e| e.value().clone()).collect();
        rows.sort_by_key(|p| p.id);
        Ok(page_of(rows, page))
    }

    async fn get_player(&self, id: i64) -> Result<Option<Player>> {
        Ok(self.players.get(&id).map(|p| p.value().clone()))
    }

    async fn upsert_players(&self, players: &[Player]) -> Result<usize> {
        for p in players {
            self.players.insert(p.id, p.clone());
        }
        Ok(players.len())
    }

    async fn rename_player(&self, id: i64, display_name: &str) -> Result<bool> {
        match self.players.get_mut(&id) {
            Some(mut p) => {
                p.display_name = display_name.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_prices(&self, prices: &[NewPrice]) -> Result<usize> {
        for p in prices {
            self.check_player(p.player_id)?;
        }
        for p in prices {
            let id = self.next_price_id.fetch_add(1, Ordering::Relaxed) + 1;
            self.prices.insert(
                id,
                Price {
                    id,
                    player_id: p.player_id,
                    price: p.price,
                    market_cap: p.market_cap,
                    holders: p.holders,
                    fetched_at: p.fetched_at,
                },
            );
        }
        Ok(prices.len())
    }

    async fn prices_page(&self, filter: PriceFilter, page: PageRequest) -> Result<Vec<Price>> {
        let mut rows: Vec<Price> = self
            .prices
            .iter()
            .map(|e| e.value().clone())
            .filter(|p| filter.player_id.map_or(true, |id| p.player_id == id))
            .filter(|p| filter.since.map_or(true, |since| p.fetched_at >= since))
            .collect();
        rows.sort_by_key(|p| (p.fetched_at, p.id));
        Ok(page_of(rows, page))
    }

    async fn latest_price(&self, player_id: i64) -> Result<Option<Price>> {
        Ok(self
            .prices
            .iter()
            .filter(|e| e.value().player_id == player_id)
            .map(|e| e.value().clone())
            .max_by_key(|p| (p.fetched_at, p.id)))
    }

    async fn delete_prices_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let before = self.prices.len();
        self.prices.retain(|_, p| p.fetched_at >= cutoff);
        Ok((before - self.prices.len()) as u64)
    }

    async fn upsert_performance(&self, rows: &[Performance]) -> Result<usize> {
        for r in rows {
            self.check_player(r.player_id)?;
        }
        for r in rows {
            self.performance.insert((r.player_id, r.match_date), r.clone());
        }
        Ok(rows.len())
    }

    async fn performance_page(&self, player_id: Option<i64>, page: PageRequest) -> Result<Vec<Performance>> {
        let mut rows: Vec<Performance> = self
            .performance
            .iter()
            .filter(|e| player_id.map_or(true, |id| e.key().0 == id))
            .map(|e| e.value().clone())
            .collect();
        rows.sort_by_key(|r| (r.match_date, r.player_id));
        Ok(page_of(rows, page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{all_performance, all_players};

    fn perf(player_id: i64, day: u32, reward: f64) -> Performance {
        Performance {
            player_id,
            match_date: NaiveDate::from_ymd_opt(2025, 4, day).unwrap(),
            raw_score: None,
            ranking: None,
            reward: Some(reward),
        }
    }

    #[tokio::test]
    async fn pages_players_in_id_order() {
        let store = MemoryStore::with_players((1..=7).rev().map(|id| Player::named(id, "x")));
        let players = all_players(&store, 3).await.unwrap();
        assert_eq!(players.iter().map(|p| p.id).collect::<Vec<_>>(), (1..=7).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn performance_upsert_overwrites_same_key() {
        let store = MemoryStore::with_players([Player::named(1, "A"), Player::named(2, "B")]);
        store.upsert_performance(&[perf(2, 1, 1.0), perf(1, 1, 2.0), perf(1, 3, 3.0)]).await.unwrap();
        store.upsert_performance(&[perf(1, 1, 9.0)]).await.unwrap();

        let all = all_performance(&store, None, 2).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!((all[0].player_id, all[0].reward), (1, Some(9.0)));
        assert_eq!(all[1].player_id, 2);
    }

    #[tokio::test]
    async fn writes_for_unknown_player_fail_whole_call() {
        let store = MemoryStore::with_players([Player::named(1, "A")]);
        let result = store.upsert_performance(&[perf(1, 1, 1.0), perf(5, 1, 1.0)]).await;
        assert!(result.is_err());
        assert!(all_performance(&store, None, 10).await.unwrap().is_empty());
    }
}
