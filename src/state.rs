use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::{Policies, RoutePolicy};
use crate::middleware::RouteGuard;
use crate::models::ApplicationRecord;
use crate::rate_limit::RateLimiter;

// app's shared state
pub struct AppState {
    pub limiter: Arc<RateLimiter>,
    pub policies: Policies,
    pub trust_proxy: bool,
    pub subscribers: DashMap<String, DateTime<Utc>>, // email -> subscribed at
    pub applications: DashMap<u64, ApplicationRecord>,
    next_application_id: AtomicU64,
}

impl AppState {
    pub fn new(limiter: Arc<RateLimiter>, policies: Policies, trust_proxy: bool) -> Self {
        Self {
            limiter,
            policies,
            trust_proxy,
            subscribers: DashMap::new(),
            applications: DashMap::new(),
            next_application_id: AtomicU64::new(1),
        }
    }

    pub fn next_application_id(&self) -> u64 {
        self.next_application_id.fetch_add(1, Ordering::Relaxed)
    }

    // Middleware state enforcing `policy` with the shared limiter
    pub fn guard(&self, policy: &RoutePolicy) -> RouteGuard {
        RouteGuard {
            limiter: Arc::clone(&self.limiter),
            policy: Arc::new(policy.clone()),
            trust_proxy: self.trust_proxy,
        }
    }
}
