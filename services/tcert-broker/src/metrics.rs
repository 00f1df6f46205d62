//! Prometheus metrics exposition
//!
//! The pool emits its own `tcert_pool_*` series. The broker adds:
//!
//! - `tcert_broker_requests_total` (counter): labels `route`, `status`

use anyhow::Context;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder and return a handle for rendering.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")
}

/// Record a completed API request.
pub fn record_request(route: &'static str, status: u16) {
    metrics::counter!(
        "tcert_broker_requests_total",
        "route" => route,
        "status" => status.to_string()
    )
    .increment(1);
}
