//! Database row types matching the schema in migrations/0001_init.sql.
//! Used by sqlx for typed queries and converted into the domain types in `crate::types`.

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::AppError;
use crate::types::{Performance, Player, Price};

pub const MATCH_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, sqlx::FromRow)]
pub struct PlayerRow {
    pub id: i64,
    pub display_name: String,
    pub team: Option<String>,
    pub position: Option<String>,
    pub token_symbol: Option<String>,
    pub token_address: Option<String>,
    pub total_shares: Option<f64>,
    pub circulating_shares: Option<f64>,
}

impl From<PlayerRow> for Player {
    fn from(r: PlayerRow) -> Self {
        Player {
            id: r.id,
            display_name: r.display_name,
            team: r.team,
            position: r.position,
            token_symbol: r.token_symbol,
            token_address: r.token_address,
            total_shares: r.total_shares,
            circulating_shares: r.circulating_shares,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct PriceRow {
    pub id: i64,
    pub player_id: i64,
    pub price: f64,
    pub market_cap: Option<f64>,
    pub holders: Option<i64>,
    /// Unix milliseconds.
    pub fetched_at: i64,
}

impl From<PriceRow> for Price {
    fn from(r: PriceRow) -> Self {
        Price {
            id: r.id,
            player_id: r.player_id,
            price: r.price,
            market_cap: r.market_cap,
            holders: r.holders,
            fetched_at: DateTime::<Utc>::from_timestamp_millis(r.fetched_at).unwrap_or_default(),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct PerformanceRow {
    pub player_id: i64,
    pub match_date: String,
    pub raw_score: Option<f64>,
    pub ranking: Option<i64>,
    pub reward: Option<f64>,
}

impl TryFrom<PerformanceRow> for Performance {
    type Error = AppError;

    fn try_from(r: PerformanceRow) -> Result<Self, Self::Error> {
        let match_date = NaiveDate::parse_from_str(&r.match_date, MATCH_DATE_FORMAT)
            .map_err(|e| AppError::Database(sqlx::Error::Decode(Box::new(e))))?;
        Ok(Performance {
            player_id: r.player_id,
            match_date,
            raw_score: r.raw_score,
            ranking: r.ranking,
            reward: r.reward,
        })
    }
}
