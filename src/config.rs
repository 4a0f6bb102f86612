use crate::error::{AppError, Result};

pub const PRICE_API_URL: &str = "https://api.tenero.io/v1/sportfun";
pub const SPORTS_API_URL: &str = "https://api.sport.fun/v1";

/// Rows per page for every paginated store read.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Rows per upsert batch in the importers.
pub const IMPORT_BATCH_SIZE: usize = 200;

/// Price samples older than this are removed by the retention job.
pub const PRICE_RETENTION_DAYS: i64 = 90;

/// Fuzzy matches are accepted only below this normalized edit distance.
pub const MATCH_MAX_DISTANCE: usize = 3;

/// Timeout applied to every outbound HTTP client.
pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// Quotes requested per page from the token-price API.
pub const PRICE_API_PAGE_LIMIT: usize = 100;

/// How often the retention job runs (seconds).
pub const RETENTION_INTERVAL_SECS: u64 = 24 * 3600;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub api_port: u16,
    pub log_level: String,
    pub price_api_url: String,
    /// Optional key sent as `x-api-key` to the token-price API (PRICE_API_KEY)
    pub price_api_key: Option<String>,
    pub sports_api_url: String,
    /// Bearer token for the sports-data API (SPORTS_API_TOKEN). Only the import scripts need it.
    pub sports_api_token: Option<String>,
    /// When set, the cron endpoint requires `Authorization: Bearer <secret>` (CRON_SECRET)
    pub cron_secret: Option<String>,
    /// When set, the admin upload route is mounted and guarded by it (ADMIN_TOKEN)
    pub admin_token: Option<String>,
    /// Background price fetch interval; 0 disables it (PRICE_FETCH_INTERVAL_SECS)
    pub price_fetch_interval_secs: u64,
    /// Price retention window; 0 disables cleanup (PRICE_RETENTION_DAYS)
    pub price_retention_days: i64,
    pub match_max_distance: usize,
    pub page_size: usize,
}

impl Config {
    /// Reads configuration from the process environment, loading `.env` first when present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let page_size = parse_var("PAGE_SIZE", DEFAULT_PAGE_SIZE)?;
        if page_size == 0 {
            return Err(AppError::Config("PAGE_SIZE must be greater than zero".to_string()));
        }

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:tp_dashboard.db".to_string()),
            api_port: parse_var("API_PORT", 3000u16)?,
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            price_api_url: std::env::var("PRICE_API_URL")
                .unwrap_or_else(|_| PRICE_API_URL.to_string()),
            price_api_key: optional_var("PRICE_API_KEY"),
            sports_api_url: std::env::var("SPORTS_API_URL")
                .unwrap_or_else(|_| SPORTS_API_URL.to_string()),
            sports_api_token: optional_var("SPORTS_API_TOKEN"),
            cron_secret: optional_var("CRON_SECRET"),
            admin_token: optional_var("ADMIN_TOKEN"),
            price_fetch_interval_secs: parse_var("PRICE_FETCH_INTERVAL_SECS", 0u64)?,
            price_retention_days: parse_var("PRICE_RETENTION_DAYS", PRICE_RETENTION_DAYS)?,
            match_max_distance: parse_var("MATCH_MAX_DISTANCE", MATCH_MAX_DISTANCE)?,
            page_size,
        })
    }

    pub fn require_sports_token(&self) -> Result<&str> {
        self.sports_api_token
            .as_deref()
            .ok_or_else(|| AppError::Config("SPORTS_API_TOKEN is not set".to_string()))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            api_port: 3000,
            log_level: "info".to_string(),
            price_api_url: PRICE_API_URL.to_string(),
            price_api_key: None,
            sports_api_url: SPORTS_API_URL.to_string(),
            sports_api_token: None,
            cron_secret: None,
            admin_token: None,
            price_fetch_interval_secs: 0,
            price_retention_days: PRICE_RETENTION_DAYS,
            match_max_distance: MATCH_MAX_DISTANCE,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

fn optional_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match optional_var(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{key} has invalid value {raw:?}"))),
        None => Ok(default),
    }
}
