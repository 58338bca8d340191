//! Metrics collection and exposition.
//!
//! # Metrics
//! - `relay_sessions_active` (gauge): sessions currently streaming
//! - `relay_sessions_total` (counter): finished sessions by `outcome`
//! - `relay_bytes_forwarded_total` (counter): upstream bytes written to clients
//! - `relay_heartbeats_total` (counter): `ping` events written
//! - `relay_upstream_rejections_total` (counter): non-success upstream answers by `status`
//!
//! Recording through the `metrics` facade is a no-op until a recorder is
//! installed, so tests and metrics-disabled deployments pay nothing.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_session_started() {
    metrics::gauge!("relay_sessions_active").increment(1.0);
}

pub fn record_session_finished(outcome: &'static str) {
    metrics::gauge!("relay_sessions_active").decrement(1.0);
    metrics::counter!("relay_sessions_total", "outcome" => outcome).increment(1);
}

pub fn record_bytes_forwarded(len: usize) {
    metrics::counter!("relay_bytes_forwarded_total").increment(len as u64);
}

pub fn record_heartbeat() {
    metrics::counter!("relay_heartbeats_total").increment(1);
}

pub fn record_upstream_rejection(status: u16) {
    metrics::counter!("relay_upstream_rejections_total", "status" => status.to_string())
        .increment(1);
}
