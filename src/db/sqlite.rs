use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::db::models::{PerformanceRow, PlayerRow, PriceRow, MATCH_DATE_FORMAT};
use crate::db::Store;
use crate::error::Result;
use crate::types::{NewPrice, PageRequest, Performance, Player, Price, PriceFilter};

const PLAYER_COLUMNS: &str = "id, display_name, team, position, token_symbol, token_address, total_shares, circulating_shares";
const PRICE_COLUMNS: &str = "id, player_id, price, market_cap, holders, fetched_at";
const PERFORMANCE_COLUMNS: &str = "player_id, match_date, raw_score, ranking, reward";

/// SQLite-backed store. Batch writes run inside one transaction per call,
/// so a failed batch leaves earlier calls' rows in place.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url` and apply migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        // Each in-memory connection is its own database; keep exactly one alive.
        let pool = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new().max_connections(5).connect_with(options).await?
        };

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Database ready at {url}");
        Ok(Self { pool })
    }
}

fn limit_offset(page: PageRequest) -> (i64, i64) {
    (page.limit as i64, page.offset as i64)
}

#[async_trait]
impl Store for SqliteStore {
    async fn players_page(&self, page: PageRequest) -> Result<Vec<Player>> {
        let (limit, offset) = limit_offset(page);
        let rows = sqlx::query_as::<_, PlayerRow>(&format!(
            "SELECT {PLAYER_COLUMNS} FROM players ORDER BY id LIMIT ? OFFSET ?"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Player::from).collect())
    }

    async fn get_player(&self, id: i64) -> Result<Option<Player>> {
        let row = sqlx::query_as::<_, PlayerRow>(&format!(
            "SELECT {PLAYER_COLUMNS} FROM players WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Player::from))
    }

    async fn upsert_players(&self, players: &[Player]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        for p in players {
            sqlx::query(
                r#"
                INSERT INTO players (
                    id, display_name, team, position, token_symbol, token_address,
                    total_shares, circulating_shares
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    display_name = excluded.display_name,
                    team = excluded.team,
                    position = excluded.position,
                    token_symbol = excluded.token_symbol,
                    token_address = excluded.token_address,
                    total_shares = excluded.total_shares,
                    circulating_shares = excluded.circulating_shares
                "#,
            )
            .bind(p.id)
            .bind(&p.display_name)
            .bind(&p.team)
            .bind(&p.position)
            .bind(&p.token_symbol)
            .bind(&p.token_address)
            .bind(p.total_shares)
            .bind(p.circulating_shares)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(players.len())
    }

    async fn rename_player(&self, id: i64, display_name: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE players SET display_name = ? WHERE id = ?")
            .bind(display_name)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_prices(&self, prices: &[NewPrice]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        for p in prices {
            sqlx::query(
                r#"
                INSERT INTO prices (player_id, price, market_cap, holders, fetched_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(p.player_id)
            .bind(p.price)
            .bind(p.market_cap)
            .bind(p.holders)
            .bind(p.fetched_at.timestamp_millis())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(prices.len())
    }

    async fn prices_page(&self, filter: PriceFilter, page: PageRequest) -> Result<Vec<Price>> {
        let (limit, offset) = limit_offset(page);
        let since = filter.since.map(|t| t.timestamp_millis());
        let rows = sqlx::query_as::<_, PriceRow>(&format!(
            r#"
            SELECT {PRICE_COLUMNS} FROM prices
            WHERE (?1 IS NULL OR player_id = ?1)
              AND (?2 IS NULL OR fetched_at >= ?2)
            ORDER BY fetched_at, id
            LIMIT ?3 OFFSET ?4
            "#
        ))
        .bind(filter.player_id)
        .bind(since)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Price::from).collect())
    }

    async fn latest_price(&self, player_id: i64) -> Result<Option<Price>> {
        let row = sqlx::query_as::<_, PriceRow>(&format!(
            "SELECT {PRICE_COLUMNS} FROM prices WHERE player_id = ? ORDER BY fetched_at DESC, id DESC LIMIT 1"
        ))
        .bind(player_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Price::from))
    }

    async fn delete_prices_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM prices WHERE fetched_at < ?")
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn upsert_performance(&self, rows: &[Performance]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        for r in rows {
            let match_date = r.match_date.format(MATCH_DATE_FORMAT).to_string();
            sqlx::query(
                r#"
                INSERT INTO performance (player_id, match_date, raw_score, ranking, reward)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(player_id, match_date) DO UPDATE SET
                    raw_score = excluded.raw_score,
                    ranking = excluded.ranking,
                    reward = excluded.reward
                "#,
            )
            .bind(r.player_id)
            .bind(match_date)
            .bind(r.raw_score)
            .bind(r.ranking)
            .bind(r.reward)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(rows.len())
    }

    async fn performance_page(&self, player_id: Option<i64>, page: PageRequest) -> Result<Vec<Performance>> {
        let (limit, offset) = limit_offset(page);
        let rows = sqlx::query_as::<_, PerformanceRow>(&format!(
            r#"
            SELECT {PERFORMANCE_COLUMNS} FROM performance
            WHERE (?1 IS NULL OR player_id = ?1)
            ORDER BY match_date, player_id
            LIMIT ?2 OFFSET ?3
            "#
        ))
        .bind(player_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Performance::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{all_performance, all_prices};
    use chrono::{Duration, NaiveDate, TimeZone};

    async fn store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.expect("in-memory sqlite")
    }

    fn player(id: i64, name: &str) -> Player {
        Player { circulating_shares: Some(1_000_000.0), ..Player::named(id, name) }
    }

    fn perf(player_id: i64, day: u32, reward: Option<f64>) -> Performance {
        Performance {
            player_id,
            match_date: NaiveDate::from_ymd_opt(2025, 3, day).unwrap(),
            raw_score: Some(50.0),
            ranking: Some(10),
            reward,
        }
    }

    #[tokio::test]
    async fn upsert_and_rename_players() {
        let store = store().await;
        store.upsert_players(&[player(2, "Saka"), player(1, "Rúben Dias")]).await.unwrap();
        store.upsert_players(&[Player { team: Some("ARS".into()), ..player(2, "Bukayo Saka") }]).await.unwrap();

        let page = store.players_page(PageRequest { offset: 0, limit: 10 }).await.unwrap();
        assert_eq!(page.iter().map(|p| p.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(page[1].display_name, "Bukayo Saka");
        assert_eq!(page[1].team.as_deref(), Some("ARS"));

        assert!(store.rename_player(1, "Ruben Dias").await.unwrap());
        assert!(!store.rename_player(99, "Nobody").await.unwrap());
        assert_eq!(store.get_player(1).await.unwrap().unwrap().display_name, "Ruben Dias");
    }

    #[tokio::test]
    async fn performance_is_unique_per_player_and_date() {
        let store = store().await;
        store.upsert_players(&[player(1, "A")]).await.unwrap();
        store.upsert_performance(&[perf(1, 2, Some(10.0)), perf(1, 1, None)]).await.unwrap();
        store.upsert_performance(&[perf(1, 2, Some(25.0))]).await.unwrap();

        let rows = all_performance(&store, Some(1), 1).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].match_date, NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        assert_eq!(rows[1].reward, Some(25.0));
    }

    #[tokio::test]
    async fn prices_are_ordered_filtered_and_pruned() {
        let store = store().await;
        store.upsert_players(&[player(1, "A"), player(2, "B")]).await.unwrap();
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let sample = |player_id, days: i64, price| NewPrice {
            player_id,
            price,
            market_cap: None,
            holders: Some(3),
            fetched_at: base + Duration::days(days),
        };
        store
            .insert_prices(&[sample(1, 5, 0.07), sample(1, 0, 0.05), sample(2, 1, 1.0), sample(1, 100, 0.09)])
            .await
            .unwrap();

        let filter = PriceFilter { player_id: Some(1), since: None };
        let prices = all_prices(&store, filter, 2).await.unwrap();
        assert_eq!(prices.iter().map(|p| p.price).collect::<Vec<_>>(), vec![0.05, 0.07, 0.09]);

        let latest = store.latest_price(1).await.unwrap().unwrap();
        assert_eq!(latest.price, 0.09);

        let recent = PriceFilter { player_id: None, since: Some(base + Duration::days(2)) };
        assert_eq!(all_prices(&store, recent, 10).await.unwrap().len(), 2);

        let deleted = store.delete_prices_before(base + Duration::days(10)).await.unwrap();
        assert_eq!(deleted, 3);
        assert_eq!(all_prices(&store, PriceFilter::default(), 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn price_for_unknown_player_is_rejected() {
        let store = store().await;
        let result = store
            .insert_prices(&[NewPrice {
                player_id: 42,
                price: 1.0,
                market_cap: None,
                holders: None,
                fetched_at: Utc::now(),
            }])
            .await;
        assert!(result.is_err());
    }
}
