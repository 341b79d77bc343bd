use chrono::TimeDelta;
use clap::Parser;
use std::time::Duration;

use crate::error::RateLimitError;
use crate::rate_limit::RateLimitConfig;
use crate::store::MAX_GRACE_SECS;

// CLI argument structure
#[derive(Parser, Debug, Clone)]
#[command(name = "launchpad-gateway")]
#[command(about = "Rate-limited API gateway for the team website")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    // Address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: String,

    // Take the client IP from X-Forwarded-For / X-Real-IP (only behind a trusted proxy)
    #[arg(long)]
    pub trust_proxy: bool,

    // Timeout for a single rate limit store call, in milliseconds
    #[arg(long, default_value_t = 2000)]
    pub store_timeout_ms: u64,

    // Seconds between expiry sweeps of the rate limit store
    #[arg(long, default_value_t = 60)]
    pub sweep_interval: u64,

    // Extra seconds a record lives past the end of its window
    #[arg(long, default_value_t = 0)]
    pub expiry_grace: u64,

    // Newsletter signups allowed per window
    #[arg(long, default_value_t = 5)]
    pub newsletter_limit: u32,

    // Newsletter window in seconds
    #[arg(long, default_value_t = 3600)]
    pub newsletter_window: u64,

    // Application submissions allowed per window
    #[arg(long, default_value_t = 3)]
    pub apply_limit: u32,

    // Application window in seconds
    #[arg(long, default_value_t = 3600)]
    pub apply_window: u64,

    // Let requests through when the store is unreachable
    #[arg(long)]
    pub fail_open: bool,

    // Log filter, overridden by RUST_LOG
    #[arg(long, default_value = "launchpad_gateway=info")]
    pub log_filter: String,
}

impl Args {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval.max(1))
    }

    // capped at a week
    pub fn expiry_grace(&self) -> TimeDelta {
        TimeDelta::seconds(i64::try_from(self.expiry_grace).unwrap_or(i64::MAX).min(MAX_GRACE_SECS))
    }

    pub fn policies(&self) -> Result<Policies, RateLimitError> {
        let on_store_error = if self.fail_open {
            FailurePolicy::Open
        } else {
            FailurePolicy::Closed
        };

        Ok(Policies {
            newsletter: RoutePolicy {
                scope: "newsletter".to_string(),
                limit: RateLimitConfig::new(
                    self.newsletter_limit,
                    self.newsletter_window.saturating_mul(1000),
                )?,
                on_store_error,
            },
            apply: RoutePolicy {
                scope: "apply".to_string(),
                limit: RateLimitConfig::new(
                    self.apply_limit,
                    self.apply_window.saturating_mul(1000),
                )?,
                on_store_error,
            },
        })
    }
}

/// What to do with a request when the rate limit store fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Let the request through
    Open,
    /// Reject it with 503
    Closed,
}

/// Rate limit policy attached to one route
#[derive(Debug, Clone)]
pub struct RoutePolicy {
    /// Identifier prefix, e.g. `apply` in `apply:203.0.113.7`
    pub scope: String,
    pub limit: RateLimitConfig,
    pub on_store_error: FailurePolicy,
}

#[derive(Debug, Clone)]
pub struct Policies {
    pub newsletter: RoutePolicy,
    pub apply: RoutePolicy,
}
