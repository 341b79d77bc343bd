use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use crate::error::{RateLimitError, StoreError};
use crate::metrics::STORE_LATENCY;
use crate::store::{Hit, RateLimitStore};

// one year
pub const MAX_WINDOW_MS: u64 = 366 * 24 * 60 * 60 * 1000;

// Per-call-site policy, only built through new() so it is always valid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    max_requests: u32,
    window_ms: u64,
    window: TimeDelta,
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window_ms: u64) -> Result<Self, RateLimitError> {
        if max_requests == 0 {
            return Err(RateLimitError::InvalidConfig(
                "max_requests must be greater than zero".to_string(),
            ));
        }
        if window_ms == 0 {
            return Err(RateLimitError::InvalidConfig(
                "window_ms must be greater than zero".to_string(),
            ));
        }
        if window_ms > MAX_WINDOW_MS {
            return Err(RateLimitError::InvalidConfig(format!(
                "window_ms {} exceeds the maximum of {}",
                window_ms, MAX_WINDOW_MS
            )));
        }
        let window = TimeDelta::milliseconds(window_ms as i64);

        Ok(Self {
            max_requests,
            window_ms,
            window,
        })
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    pub fn window(&self) -> TimeDelta {
        self.window
    }
}

// Counter for one identifier in the current window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRecord {
    pub identifier: String,
    pub count: u32,
    pub window_start: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RateLimitRecord {
    pub fn start(
        identifier: &str,
        now: DateTime<Utc>,
        config: &RateLimitConfig,
        grace: TimeDelta,
    ) -> Self {
        Self {
            identifier: identifier.to_string(),
            count: 1,
            window_start: now,
            expires_at: now + config.window() + grace,
        }
    }

    pub fn window_elapsed(&self, now: DateTime<Utc>, config: &RateLimitConfig) -> bool {
        now - self.window_start >= config.window()
    }

    pub fn window_end(&self, config: &RateLimitConfig) -> DateTime<Utc> {
        self.window_start + config.window()
    }

    // clamped to [1, window_ms]; the upper bound covers a clock that stepped back
    pub fn retry_after_ms(&self, now: DateTime<Utc>, config: &RateLimitConfig) -> u64 {
        let remaining = (self.window_end(config) - now).num_milliseconds();
        u64::try_from(remaining)
            .unwrap_or(0)
            .clamp(1, config.window_ms())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

// Wall clock, skew between instances is not compensated
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// Only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn at_millis(millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(millis),
        }
    }

    pub fn set_millis(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let by = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.millis.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

// Fixed-window limiter. Policy comes with each call, counters live in the store.
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, store_timeout: Duration) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), store_timeout)
    }

    pub fn with_clock(
        store: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            store_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn RateLimitStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // Store failures go back to the caller, which picks allow or deny
    pub async fn check_rate_limit(
        &self,
        identifier: &str,
        config: &RateLimitConfig,
    ) -> Result<Decision, RateLimitError> {
        let now = self.clock.now();
        let started = Instant::now();

        let hit = tokio::time::timeout(self.store_timeout, self.store.hit(identifier, config, now)).await;
        // timeouts included
        STORE_LATENCY.observe(started.elapsed().as_secs_f64());
        let hit = hit.map_err(|_| StoreError::Timeout(self.store_timeout))?;

        let decision = match hit? {
            Hit::Admitted(record) => Decision {
                success: true,
                retry_after_ms: None,
                limit: config.max_requests(),
                remaining: config.max_requests().saturating_sub(record.count),
                reset_at: record.window_end(config),
            },
            Hit::Exhausted(record) => Decision {
                success: false,
                retry_after_ms: Some(record.retry_after_ms(now, config)),
                limit: config.max_requests(),
                remaining: 0,
                reset_at: record.window_end(config),
            },
        };
        Ok(decision)
    }
}
