//! Shared price-sync state for the /health endpoint.
//! Updated by the cron handler and PriceRefresher.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};

/// Outcome of the most recent price syncs. Written by sync callers, read by the API.
#[derive(Default)]
pub struct SyncHealth {
    /// Unix millis of the last successful sync (0 = none yet).
    last_sync_at_ms: AtomicI64,
    /// Rows written by the last successful sync.
    last_sync_count: AtomicU64,
    /// Failed syncs since the last success.
    consecutive_failures: AtomicU64,
}

impl SyncHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, at: DateTime<Utc>, count: usize) {
        self.last_sync_at_ms.store(at.timestamp_millis(), Ordering::Relaxed);
        self.last_sync_count.store(count as u64, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_sync_at(&self) -> Option<DateTime<Utc>> {
        match self.last_sync_at_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    pub fn last_sync_count(&self) -> u64 {
        self.last_sync_count.load(Ordering::Relaxed)
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_resets_failures() {
        let health = SyncHealth::new();
        assert!(health.last_sync_at().is_none());

        health.record_failure();
        health.record_failure();
        assert_eq!(health.consecutive_failures(), 2);

        let at = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        health.record_success(at, 12);
        assert_eq!(health.last_sync_at(), Some(at));
        assert_eq!(health.last_sync_count(), 12);
        assert_eq!(health.consecutive_failures(), 0);
    }
}
