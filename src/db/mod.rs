pub mod memory;
pub mod models;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::pagination::Pages;
use crate::types::{NewPrice, PageRequest, Performance, Player, Price, PriceFilter};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Handle to the players / prices / performance tables.
///
/// Constructed once per process and passed to every handler and script by
/// reference. Page reads return rows in a stable order so offset pagination
/// never skips or repeats rows between pages.
#[async_trait]
pub trait Store: Send + Sync {
    /// Players ordered by id.
    async fn players_page(&self, page: PageRequest) -> Result<Vec<Player>>;

    async fn get_player(&self, id: i64) -> Result<Option<Player>>;

    /// Insert or overwrite players by id. Returns rows written.
    async fn upsert_players(&self, players: &[Player]) -> Result<usize>;

    /// Returns false when no player has this id.
    async fn rename_player(&self, id: i64, display_name: &str) -> Result<bool>;

    /// Append price samples. Returns rows written.
    async fn insert_prices(&self, prices: &[NewPrice]) -> Result<usize>;

    /// Prices ordered by (fetched_at, id).
    async fn prices_page(&self, filter: PriceFilter, page: PageRequest) -> Result<Vec<Price>>;

    async fn latest_price(&self, player_id: i64) -> Result<Option<Price>>;

    /// Delete samples fetched strictly before `cutoff`. Returns rows deleted.
    async fn delete_prices_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Insert or overwrite by (player_id, match_date). Returns rows written.
    async fn upsert_performance(&self, rows: &[Performance]) -> Result<usize>;

    /// Performance ordered by (match_date, player_id).
    async fn performance_page(&self, player_id: Option<i64>, page: PageRequest) -> Result<Vec<Performance>>;
}

pub async fn all_players(store: &dyn Store, page_size: usize) -> Result<Vec<Player>> {
    Pages::new(page_size, move |req| store.players_page(req)).collect_all().await
}

pub async fn all_prices(store: &dyn Store, filter: PriceFilter, page_size: usize) -> Result<Vec<Price>> {
    Pages::new(page_size, move |req| store.prices_page(filter, req)).collect_all().await
}

pub async fn all_performance(
    store: &dyn Store,
    player_id: Option<i64>,
    page_size: usize,
) -> Result<Vec<Performance>> {
    Pages::new(page_size, move |req| store.performance_page(player_id, req)).collect_all().await
}
