use lazy_static::lazy_static;
use prometheus::{
    Counter, Gauge, Histogram, IntCounterVec, register_counter, register_gauge,
    register_histogram, register_int_counter_vec,
};

lazy_static! {
    pub static ref REQUEST_TOTAL: Counter =
        register_counter!("launchpad_http_requests_total", "Total number of requests to rate limited routes").unwrap();
    pub static ref RATE_LIMIT_CHECKS: IntCounterVec = register_int_counter_vec!(
        "launchpad_rate_limit_checks_total",
        "Rate limit checks by scope and outcome",
        &["scope", "outcome"]
    )
    .unwrap();
    pub static ref STORE_LATENCY: Histogram = register_histogram!(
        "launchpad_rate_limit_store_latency_seconds",
        "Latency of rate limit store round trips in seconds"
    )
    .unwrap();
    pub static ref TRACKED_IDENTIFIERS: Gauge = register_gauge!(
        "launchpad_rate_limit_tracked_identifiers",
        "Rate limit records currently held by the store"
    )
    .unwrap();
    pub static ref SWEPT_TOTAL: Counter = register_counter!(
        "launchpad_rate_limit_swept_total",
        "Expired rate limit records removed by the sweeper"
    )
    .unwrap();
}

// Render every registered metric in the text exposition format
pub fn render() -> Result<String, String> {
    use prometheus::{Encoder, TextEncoder};

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Encode error: {}", e))?;
    String::from_utf8(buffer).map_err(|e| format!("Metrics are not UTF-8: {}", e))
}
