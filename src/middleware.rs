use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::config::{FailurePolicy, RoutePolicy};
use crate::error::ApiError;
use crate::metrics::{RATE_LIMIT_CHECKS, REQUEST_TOTAL};
use crate::rate_limit::{Decision, RateLimiter};

const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// State for [`enforce_rate_limit`]: one policy bound to the shared limiter
#[derive(Clone)]
pub struct RouteGuard {
    pub limiter: Arc<RateLimiter>,
    pub policy: Arc<RoutePolicy>,
    pub trust_proxy: bool,
}

// First parseable IP in a header value; X-Forwarded-For lists the client first
fn header_ip(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').map(str::trim).find(|s| !s.is_empty()))
        .and_then(|s| s.parse().ok())
}

/// Best-effort client address. Proxy headers are only believed with `trust_proxy`.
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>, trust_proxy: bool) -> String {
    let forwarded = if trust_proxy {
        header_ip(headers, "x-forwarded-for").or_else(|| header_ip(headers, "x-real-ip"))
    } else {
        None
    };

    forwarded
        .or(peer)
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn make_identifier(scope: &str, ip: &str) -> String {
    format!("{}:{}", scope, ip)
}

fn insert_rate_limit_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(
        X_RATELIMIT_RESET,
        HeaderValue::from(decision.reset_at.timestamp()),
    );
}

/// Count the request against the route's policy before handing it on.
///
/// Denied requests get 429 with `Retry-After`. When the store fails, the
/// route's [`FailurePolicy`] decides between 503 and letting it through.
pub async fn enforce_rate_limit(
    State(guard): State<RouteGuard>,
    req: Request,
    next: Next,
) -> Response {
    REQUEST_TOTAL.inc();

    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let ip = client_ip(req.headers(), peer, guard.trust_proxy);
    let identifier = make_identifier(&guard.policy.scope, &ip);
    let scope = guard.policy.scope.as_str();

    match guard
        .limiter
        .check_rate_limit(&identifier, &guard.policy.limit)
        .await
    {
        Ok(decision) if decision.success => {
            RATE_LIMIT_CHECKS.with_label_values(&[scope, "allowed"]).inc();
            let mut response = next.run(req).await;
            insert_rate_limit_headers(response.headers_mut(), &decision);
            response
        }
        Ok(decision) => {
            RATE_LIMIT_CHECKS.with_label_values(&[scope, "denied"]).inc();
            tracing::debug!(
                %identifier,
                retry_after_ms = decision.retry_after_ms,
                "Rate limit exceeded"
            );
            let mut headers = HeaderMap::new();
            insert_rate_limit_headers(&mut headers, &decision);
            (headers, ApiError::RateLimited(decision)).into_response()
        }
        Err(e) => {
            RATE_LIMIT_CHECKS.with_label_values(&[scope, "error"]).inc();
            match guard.policy.on_store_error {
                FailurePolicy::Open => {
                    tracing::warn!(%identifier, error = %e, "Rate limit check failed, allowing request");
                    next.run(req).await
                }
                FailurePolicy::Closed => {
                    tracing::error!(%identifier, error = %e, "Rate limit check failed, rejecting request");
                    ApiError::Unavailable.into_response()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(*value));
        }
        map
    }

    #[test]
    fn test_peer_address_used_without_trust() {
        let map = headers(&[("x-forwarded-for", "203.0.113.9")]);
        let peer = Some("10.0.0.2".parse().unwrap());
        assert_eq!(client_ip(&map, peer, false), "10.0.0.2");
    }

    #[test]
    fn test_forwarded_for_first_entry_when_trusted() {
        let map = headers(&[("x-forwarded-for", " 203.0.113.9 , 10.0.0.1")]);
        let peer = Some("10.0.0.2".parse().unwrap());
        assert_eq!(client_ip(&map, peer, true), "203.0.113.9");
    }

    #[test]
    fn test_real_ip_and_garbage_fallbacks() {
        let map = headers(&[("x-forwarded-for", "not-an-ip"), ("x-real-ip", "2001:db8::1")]);
        assert_eq!(client_ip(&map, None, true), "2001:db8::1");

        let map = headers(&[("x-real-ip", "bogus")]);
        assert_eq!(client_ip(&map, None, true), "unknown");
    }

    #[test]
    fn test_make_identifier() {
        assert_eq!(make_identifier("apply", "203.0.113.9"), "apply:203.0.113.9");
    }
}
