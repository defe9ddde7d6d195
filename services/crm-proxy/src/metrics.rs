//! Prometheus metrics exposition
//!
//! - `crm_proxy_requests_total` (counter): labels `status`, `route`
//! - `crm_proxy_request_duration_seconds` (histogram): label `status`
//! - `crm_downstream_requests_total` (counter): label `outcome`, emitted by the gateway
//! - `crm_token_refresh_total` (counter): label `outcome`, emitted by the gateway

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

const DURATION_METRIC: &str = "crm_proxy_request_duration_seconds";

/// Bucket boundaries from 5ms to 60s. A request can wait on a refresh and a
/// retried downstream call, so the upper end is generous.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        metrics_exporter_prometheus::Matcher::Full(DURATION_METRIC.to_string()),
        DURATION_BUCKETS,
    )
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Record a completed request with status code and route labels.
pub fn record_request(status: u16, route: &'static str, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!("crm_proxy_requests_total", "status" => status_str.clone(), "route" => route)
        .increment(1);
    metrics::histogram!(DURATION_METRIC, "status" => status_str).record(duration_secs);
}
