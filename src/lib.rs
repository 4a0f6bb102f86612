pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod import;
pub mod matching;
pub mod pagination;
pub mod price_sync;
pub mod stats;
pub mod types;
