use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use std::sync::Arc;

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod rate_limit;
pub mod state;
pub mod store;

pub use config::{Args, FailurePolicy, Policies, RoutePolicy};
pub use error::{ApiError, RateLimitError, StoreError};
pub use rate_limit::{Clock, Decision, ManualClock, RateLimitConfig, RateLimitRecord, RateLimiter, SystemClock};
pub use state::AppState;
pub use store::{Hit, MemoryStore, RateLimitStore};

use handlers::{health_handler, metrics_handler, submit_application_handler, subscribe_handler};
use middleware::enforce_rate_limit;

// each limited route carries its own policy
pub fn build_router(state: Arc<AppState>) -> Router {
    let newsletter = Router::new()
        .route("/api/newsletter", post(subscribe_handler))
        .route_layer(axum_middleware::from_fn_with_state(
            state.guard(&state.policies.newsletter),
            enforce_rate_limit,
        ));

    let applications = Router::new()
        .route("/api/applications", post(submit_application_handler))
        .route_layer(axum_middleware::from_fn_with_state(
            state.guard(&state.policies.apply),
            enforce_rate_limit,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .merge(newsletter)
        .merge(applications)
        .with_state(state)
}
