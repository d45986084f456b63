use prometheus::{register_int_counter_vec, Encoder, IntCounterVec, TextEncoder};
use std::sync::LazyLock;

pub static REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "bazaar_wallet_requests_total",
        "Total HTTP requests",
        &["endpoint", "status"]
    )
    .unwrap()
});

pub static AUTH_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "bazaar_wallet_auth_failures_total",
        "Authentication and authorization rejections",
        &["reason"]
    )
    .unwrap()
});

pub static RATE_LIMITED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "bazaar_wallet_rate_limited_total",
        "Requests rejected by a throttling policy",
        &["policy"]
    )
    .unwrap()
});

pub static CALLBACKS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "bazaar_wallet_callbacks_total",
        "Payment callback outcomes",
        &["outcome"]
    )
    .unwrap()
});

pub fn metrics_output() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
