use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Player
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: i64,
    pub display_name: String,
    pub team: Option<String>,
    pub position: Option<String>,
    pub token_symbol: Option<String>,
    pub token_address: Option<String>,
    pub total_shares: Option<f64>,
    /// Tradable token units; market cap is derived from these.
    pub circulating_shares: Option<f64>,
}

impl Player {
    /// Bare player with only an id and a name.
    pub fn named(id: i64, display_name: &str) -> Self {
        Self {
            id,
            display_name: display_name.to_string(),
            team: None,
            position: None,
            token_symbol: None,
            token_address: None,
            total_shares: None,
            circulating_shares: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Price samples
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub id: i64,
    pub player_id: i64,
    pub price: f64,
    pub market_cap: Option<f64>,
    pub holders: Option<i64>,
    pub fetched_at: DateTime<Utc>,
}

/// A price sample before the store assigns it an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPrice {
    pub player_id: i64,
    pub price: f64,
    pub market_cap: Option<f64>,
    pub holders: Option<i64>,
    pub fetched_at: DateTime<Utc>,
}

/// Filter for paginated price reads. Rows always come back in fetch order.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriceFilter {
    pub player_id: Option<i64>,
    pub since: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Performance
// ---------------------------------------------------------------------------

/// One player's result on one match date. Unique per (player_id, match_date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Performance {
    pub player_id: i64,
    pub match_date: NaiveDate,
    pub raw_score: Option<f64>,
    pub ranking: Option<i64>,
    /// TP credited for this result.
    pub reward: Option<f64>,
}

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
}
