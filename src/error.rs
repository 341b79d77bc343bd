use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::time::Duration;
use thiserror::Error;

use crate::rate_limit::Decision;

/// Failures of the backing counter store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or rejected the operation
    #[error("rate limit store unavailable: {0}")]
    Unavailable(String),

    /// The store did not answer within the configured timeout
    #[error("rate limit store timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors returned by the rate limiter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    /// Caller passed a policy that can never be satisfied
    #[error("invalid rate limit config: {0}")]
    InvalidConfig(String),

    /// Backing store failed; the caller decides whether to allow or deny
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors surfaced by the HTTP handlers and the rate limit middleware
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("rate limit exceeded")]
    RateLimited(Decision),

    #[error("service temporarily unavailable")]
    Unavailable,

    #[error("internal error: {0}")]
    Internal(String),
}

// Malformed bodies are validation errors like any other
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

// Seconds shown to the user, never zero while a denial is in effect
pub fn retry_after_secs(retry_after_ms: u64) -> u64 {
    retry_after_ms.div_ceil(1000).max(1)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(message) => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": message })),
            )
                .into_response(),
            ApiError::RateLimited(decision) => {
                let retry_after_ms = decision.retry_after_ms.unwrap_or(0);
                let secs = retry_after_secs(retry_after_ms);
                let body = serde_json::json!({
                    "error": format!("Too many requests. Try again in {} seconds.", secs),
                    "retryAfterMs": retry_after_ms,
                });
                let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(secs));
                response
            }
            ApiError::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "error": "Service temporarily unavailable. Please try again shortly."
                })),
            )
                .into_response(),
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "Internal error while handling request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "error": "Internal server error" })),
                )
                    .into_response()
            }
        }
    }
}
