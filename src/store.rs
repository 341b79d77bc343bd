use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tokio::time::{Duration, interval};

use crate::error::StoreError;
use crate::metrics::{SWEPT_TOTAL, TRACKED_IDENTIFIERS};
use crate::rate_limit::{Clock, RateLimitConfig, RateLimitRecord};

// One week
pub const MAX_GRACE_SECS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hit {
    // record after the update
    Admitted(RateLimitRecord),
    // window full, record untouched
    Exhausted(RateLimitRecord),
}

// Shared counter backend. `hit` must be one atomic step: several gateway
// instances may share a store.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn hit(
        &self,
        identifier: &str,
        config: &RateLimitConfig,
        now: DateTime<Utc>,
    ) -> Result<Hit, StoreError>;

    async fn get(&self, identifier: &str) -> Result<Option<RateLimitRecord>, StoreError>;

    // removes records with expires_at <= now
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    async fn tracked(&self) -> Result<usize, StoreError>;
}

// The entry API holds the shard write lock for the whole read-modify-write
pub struct MemoryStore {
    records: DashMap<String, RateLimitRecord>,
    grace: TimeDelta,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_grace(TimeDelta::zero())
    }

    // grace is added to every expires_at, clamped to [0, MAX_GRACE_SECS]
    pub fn with_grace(grace: TimeDelta) -> Self {
        Self {
            records: DashMap::new(),
            grace: grace.clamp(TimeDelta::zero(), TimeDelta::seconds(MAX_GRACE_SECS)),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn hit(
        &self,
        identifier: &str,
        config: &RateLimitConfig,
        now: DateTime<Utc>,
    ) -> Result<Hit, StoreError> {
        let hit = match self.records.entry(identifier.to_string()) {
            Entry::Vacant(slot) => {
                let record = RateLimitRecord::start(identifier, now, config, self.grace);
                slot.insert(record.clone());
                Hit::Admitted(record)
            }
            Entry::Occupied(mut slot) => {
                let record = slot.get_mut();
                if record.window_elapsed(now, config) {
                    *record = RateLimitRecord::start(identifier, now, config, self.grace);
                    Hit::Admitted(record.clone())
                } else if record.count < config.max_requests() {
                    record.count += 1;
                    Hit::Admitted(record.clone())
                } else {
                    Hit::Exhausted(record.clone())
                }
            }
        };
        Ok(hit)
    }

    async fn get(&self, identifier: &str) -> Result<Option<RateLimitRecord>, StoreError> {
        Ok(self.records.get(identifier).map(|r| r.value().clone()))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let before = self.records.len();
        self.records.retain(|_, record| record.expires_at > now);
        Ok(before.saturating_sub(self.records.len()))
    }

    async fn tracked(&self) -> Result<usize, StoreError> {
        Ok(self.records.len())
    }
}

// Expiry sweep - the in-process stand-in for a TTL index
pub async fn expiry_sweeper(
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    sweep_interval: Duration,
) {
    let mut interval = interval(sweep_interval);

    tracing::info!(interval = ?sweep_interval, "Expiry sweeper started");

    loop {
        interval.tick().await;
        sweep_once(store.as_ref(), clock.as_ref()).await;
    }
}

// One pass; errors are logged, never fatal
pub async fn sweep_once(store: &dyn RateLimitStore, clock: &dyn Clock) -> usize {
    let removed = match store.purge_expired(clock.now()).await {
        Ok(removed) => removed,
        Err(e) => {
            tracing::warn!(error = %e, "Expiry sweep failed");
            return 0;
        }
    };
    SWEPT_TOTAL.inc_by(removed as f64);

    match store.tracked().await {
        Ok(tracked) => {
            TRACKED_IDENTIFIERS.set(tracked as f64);
            tracing::debug!(removed, tracked, "Expiry sweep finished");
        }
        Err(e) => tracing::warn!(error = %e, "Could not count tracked identifiers"),
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::ManualClock;

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    #[tokio::test]
    async fn test_first_hit_creates_record() {
        let store = MemoryStore::new();
        let config = RateLimitConfig::new(2, 1000).unwrap();

        let hit = store.hit("apply:10.0.0.1", &config, at(0)).await.unwrap();
        let Hit::Admitted(record) = hit else {
            panic!("first hit must be admitted");
        };
        assert_eq!(record.identifier, "apply:10.0.0.1");
        assert_eq!(record.count, 1);
        assert_eq!(record.window_start, at(0));
        assert_eq!(record.expires_at, at(1000));
        assert_eq!(store.tracked().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_hit_leaves_record_untouched() {
        let store = MemoryStore::new();
        let config = RateLimitConfig::new(1, 1000).unwrap();

        store.hit("k", &config, at(0)).await.unwrap();
        let hit = store.hit("k", &config, at(10)).await.unwrap();
        assert!(matches!(hit, Hit::Exhausted(ref r) if r.count == 1));

        let record = store.get("k").await.unwrap().unwrap();
        assert_eq!(record.count, 1);
        assert_eq!(record.window_start, at(0));
    }

    #[tokio::test]
    async fn test_reset_refreshes_window_and_expiry() {
        let store = MemoryStore::with_grace(TimeDelta::milliseconds(250));
        let config = RateLimitConfig::new(1, 1000).unwrap();

        store.hit("k", &config, at(0)).await.unwrap();
        let hit = store.hit("k", &config, at(1000)).await.unwrap();
        let Hit::Admitted(record) = hit else {
            panic!("hit after window must be admitted");
        };
        assert_eq!(record.count, 1);
        assert_eq!(record.window_start, at(1000));
        assert_eq!(record.expires_at, at(2250));
        assert_eq!(store.tracked().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_grace_keeps_record_past_window_end() {
        let store = MemoryStore::with_grace(TimeDelta::milliseconds(250));
        let config = RateLimitConfig::new(1, 1000).unwrap();

        store.hit("k", &config, at(0)).await.unwrap();
        assert_eq!(store.purge_expired(at(1000)).await.unwrap(), 0);
        assert_eq!(store.purge_expired(at(1249)).await.unwrap(), 0);
        assert_eq!(store.purge_expired(at(1250)).await.unwrap(), 1);
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_grace_is_clamped() {
        let config = RateLimitConfig::new(1, 1000).unwrap();

        let store = MemoryStore::with_grace(TimeDelta::days(365 * 1000));
        let Hit::Admitted(record) = store.hit("k", &config, at(0)).await.unwrap() else {
            panic!("first hit must be admitted");
        };
        assert_eq!(record.expires_at, at(1000) + TimeDelta::seconds(MAX_GRACE_SECS));

        let store = MemoryStore::with_grace(TimeDelta::milliseconds(-500));
        let Hit::Admitted(record) = store.hit("k", &config, at(0)).await.unwrap() else {
            panic!("first hit must be admitted");
        };
        assert_eq!(record.expires_at, at(1000));
    }

    #[tokio::test]
    async fn test_purge_removes_only_expired() {
        let store = MemoryStore::new();
        let short = RateLimitConfig::new(1, 1000).unwrap();
        let long = RateLimitConfig::new(1, 60_000).unwrap();

        store.hit("short", &short, at(0)).await.unwrap();
        store.hit("long", &long, at(0)).await.unwrap();

        assert_eq!(store.purge_expired(at(999)).await.unwrap(), 0);
        assert_eq!(store.purge_expired(at(1000)).await.unwrap(), 1);
        assert!(store.get("short").await.unwrap().is_none());
        assert!(store.get("long").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sweep_once_uses_clock() {
        let store = MemoryStore::new();
        let config = RateLimitConfig::new(1, 1000).unwrap();
        store.hit("a", &config, at(0)).await.unwrap();
        store.hit("b", &config, at(500)).await.unwrap();

        let clock = ManualClock::at_millis(1200);
        assert_eq!(sweep_once(&store, &clock).await, 1);
        assert!(store.get("b").await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_hits_never_exceed_limit() {
        let store = Arc::new(MemoryStore::new());
        let config = RateLimitConfig::new(10, 60_000).unwrap();

        let mut handles = Vec::new();
        for _ in 0..64 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.hit("shared", &config, at(0)).await.unwrap()
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), Hit::Admitted(_)) {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
        assert_eq!(store.get("shared").await.unwrap().unwrap().count, 10);
    }
}
