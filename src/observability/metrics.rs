//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, cache outcome
//! - `proxy_request_duration_seconds` (histogram): time to response headers
//! - `proxy_cache_lookups_total` (counter): hit / miss / stale / corrupt / bypass
//! - `proxy_cache_writes_total` (counter): stored / aborted / failed
//! - `proxy_cache_swept_total` (counter): entries and leftovers removed by sweeps
//! - `proxy_tunnels_total` (counter): CONNECT outcomes
//! - `proxy_active_connections` (gauge): open client connections
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::cache::SweepReport;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, cache: &'static str, start: Instant) {
    metrics::counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "cache" => cache
    )
    .increment(1);
    metrics::histogram!("proxy_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_cache_lookup(outcome: &'static str) {
    metrics::counter!("proxy_cache_lookups_total", "outcome" => outcome).increment(1);
}

pub fn record_cache_write(outcome: &'static str) {
    metrics::counter!("proxy_cache_writes_total", "outcome" => outcome).increment(1);
}

pub fn record_sweep(report: &SweepReport) {
    metrics::counter!("proxy_cache_swept_total", "kind" => "entry").increment(report.removed as u64);
    metrics::counter!("proxy_cache_swept_total", "kind" => "leftover")
        .increment(report.leftovers as u64);
}

pub fn record_tunnel(outcome: &'static str) {
    metrics::counter!("proxy_tunnels_total", "outcome" => outcome).increment(1);
}

pub fn record_active_connections(count: u64) {
    metrics::gauge!("proxy_active_connections").set(count as f64);
}
