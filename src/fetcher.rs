use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{Config, HTTP_TIMEOUT_SECS, PRICE_API_PAGE_LIMIT};
use crate::error::{AppError, Result};
use crate::types::Player;

/// One token quote from the token-price API.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenQuote {
    pub address: String,
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub price_usd: f64,
    pub market_cap: Option<f64>,
    pub holders: Option<i64>,
}

fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()?)
}

async fn read_json(service: &'static str, resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(AppError::Upstream {
            service,
            status: status.as_u16(),
            body: body.chars().take(200).collect(),
        });
    }
    Ok(resp.json().await?)
}

// ---------------------------------------------------------------------------
// Token-price API
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct TokenPriceClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl TokenPriceClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(cfg.price_api_url.clone(), cfg.price_api_key.clone())
    }

    /// Fetch one page. Returns the quotes and the cursor for the next page, if any.
    pub async fn fetch_page(&self, cursor: Option<&str>) -> Result<(Vec<TokenQuote>, Option<String>)> {
        let mut req = self
            .client
            .get(format!("{}/tokens", self.base_url))
            .query(&[("limit", PRICE_API_PAGE_LIMIT.to_string())]);
        if let Some(c) = cursor {
            req = req.query(&[("cursor", c)]);
        }
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key);
        }

        let body = read_json("token-price API", req.send().await?).await?;
        Ok(parse_quote_page(&body))
    }

    /// Follow the cursor until the API stops returning one.
    pub async fn fetch_all(&self) -> Result<Vec<TokenQuote>> {
        let mut quotes = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let (page, next) = self.fetch_page(cursor.as_deref()).await?;
            pages += 1;
            debug!(page = pages, quotes = page.len(), "token-price page fetched");
            quotes.extend(page);

            match next {
                Some(n) if cursor.as_deref() != Some(n.as_str()) => cursor = Some(n),
                Some(n) => {
                    warn!("token-price API repeated cursor {n}; stopping pagination");
                    break;
                }
                None => break,
            }
        }

        info!("Fetched {} token quotes in {} pages", quotes.len(), pages);
        Ok(quotes)
    }
}

/// Parse a quote page: either `{"data": [...], "next_cursor": "..."}` or a bare array.
pub fn parse_quote_page(body: &Value) -> (Vec<TokenQuote>, Option<String>) {
    let items = body
        .as_array()
        .or_else(|| body.get("data").and_then(Value::as_array))
        .or_else(|| body.get("tokens").and_then(Value::as_array));

    let quotes = items
        .map(|a| a.iter().filter_map(parse_quote).collect())
        .unwrap_or_default();

    let cursor = ["next_cursor", "nextCursor", "cursor"]
        .iter()
        .find_map(|k| body.get(*k).and_then(Value::as_str))
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    (quotes, cursor)
}

pub fn parse_quote(v: &Value) -> Option<TokenQuote> {
    let address = first_str(v, &["address", "token_address", "mint"])?;
    let price_usd = first_f64(v, &["price_usd", "price", "priceUsd"])?;
    Some(TokenQuote {
        address,
        symbol: first_str(v, &["symbol", "ticker"]),
        name: first_str(v, &["name"]),
        price_usd,
        market_cap: first_f64(v, &["market_cap", "marketcap", "marketCap"]),
        holders: first_f64(v, &["holders", "holder_count", "holderCount"]).map(|h| h as i64),
    })
}

// ---------------------------------------------------------------------------
// Sports-data API
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SportsDataClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl SportsDataClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(cfg.sports_api_url.clone(), cfg.require_sports_token()?)
    }

    /// Every player the API knows about, with token info and share counts.
    pub async fn fetch_players(&self) -> Result<Vec<Player>> {
        let resp = self
            .client
            .get(format!("{}/players", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let body = read_json("sports-data API", resp).await?;

        let items = body
            .as_array()
            .or_else(|| body.get("data").and_then(Value::as_array))
            .or_else(|| body.get("players").and_then(Value::as_array))
            .ok_or_else(|| AppError::Upstream {
                service: "sports-data API",
                status: 200,
                body: "players response was not an array".to_string(),
            })?;

        let players: Vec<Player> = items.iter().filter_map(parse_api_player).collect();
        if players.len() < items.len() {
            warn!("Skipped {} malformed player records", items.len() - players.len());
        }
        Ok(players)
    }
}

pub fn parse_api_player(v: &Value) -> Option<Player> {
    let id = first_f64(v, &["id", "player_id", "playerId"])? as i64;
    let display_name = first_str(v, &["display_name", "displayName", "name", "full_name"])?;
    let token = v.get("token");
    let from_token = |keys: &[&str]| token.and_then(|t| first_str(t, keys));

    Some(Player {
        id,
        display_name,
        team: first_str(v, &["team", "team_name", "club"]),
        position: first_str(v, &["position"]),
        token_symbol: from_token(&["symbol"]).or_else(|| first_str(v, &["token_symbol"])),
        token_address: from_token(&["address"]).or_else(|| first_str(v, &["token_address"])),
        total_shares: first_f64(v, &["total_shares", "totalShares"]),
        circulating_shares: first_f64(v, &["circulating_shares", "active_shares", "activeShares"]),
    })
}

// ---------------------------------------------------------------------------
// Field helpers: the APIs mix numbers and numeric strings.
// ---------------------------------------------------------------------------

fn first_str(v: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| v.get(*k))
        .and_then(|x| match x {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .filter(|s| !s.is_empty())
}

fn first_f64(v: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .find_map(|k| v.get(*k))
        .and_then(|x| x.as_f64().or_else(|| x.as_str().and_then(|s| s.trim().parse().ok())))
        .filter(|f: &f64| f.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Query, routing::get, Json, Router};
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn parses_quotes_with_string_numbers() {
        let body = json!({
            "data": [
                {"address": "0xAbC", "symbol": "SAKA", "price_usd": "0.052", "market_cap": 52000, "holders": "41"},
                {"address": "0xdef", "price": 1.5},
                {"symbol": "NOADDR", "price": 1.0},
                {"address": "0x123", "price": "n/a"}
            ],
            "next_cursor": "abc"
        });
        let (quotes, cursor) = parse_quote_page(&body);
        assert_eq!(cursor.as_deref(), Some("abc"));
        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[0].address, "0xAbC");
        assert!((quotes[0].price_usd - 0.052).abs() < 1e-12);
        assert_eq!(quotes[0].holders, Some(41));
        assert_eq!(quotes[1].symbol, None);
    }

    #[test]
    fn bare_array_page_has_no_cursor() {
        let (quotes, cursor) = parse_quote_page(&json!([{"address": "a", "price": 2}]));
        assert_eq!(quotes.len(), 1);
        assert!(cursor.is_none());
        let (_, empty_cursor) = parse_quote_page(&json!({"data": [], "next_cursor": ""}));
        assert!(empty_cursor.is_none());
    }

    #[test]
    fn parses_api_player_with_nested_token() {
        let v = json!({
            "id": "17",
            "name": "Rúben Dias",
            "team": "MCI",
            "position": "DEF",
            "token": {"symbol": "DIAS", "address": "0xdias"},
            "active_shares": "250000"
        });
        let p = parse_api_player(&v).unwrap();
        assert_eq!(p.id, 17);
        assert_eq!(p.display_name, "Rúben Dias");
        assert_eq!(p.token_symbol.as_deref(), Some("DIAS"));
        assert_eq!(p.token_address.as_deref(), Some("0xdias"));
        assert_eq!(p.circulating_shares, Some(250_000.0));
        assert!(parse_api_player(&json!({"name": "no id"})).is_none());
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn follows_cursor_across_pages() {
        let app = Router::new().route(
            "/tokens",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                match q.get("cursor").map(String::as_str) {
                    None => Json(json!({"data": [{"address": "a", "price": 1}], "next_cursor": "p2"})),
                    Some("p2") => Json(json!({"data": [{"address": "b", "price": 2}], "next_cursor": "p3"})),
                    _ => Json(json!({"data": [{"address": "c", "price": 3}]})),
                }
            }),
        );
        let client = TokenPriceClient::new(serve(app).await, None).unwrap();
        let quotes = client.fetch_all().await.unwrap();
        assert_eq!(quotes.iter().map(|q| q.address.as_str()).collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn upstream_error_status_is_reported() {
        let app = Router::new().route(
            "/players",
            get(|| async { (axum::http::StatusCode::UNAUTHORIZED, "bad token") }),
        );
        let client = SportsDataClient::new(serve(app).await, "nope").unwrap();
        match client.fetch_players().await {
            Err(AppError::Upstream { status, body, .. }) => {
                assert_eq!(status, 401);
                assert_eq!(body, "bad token");
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
    }
}
