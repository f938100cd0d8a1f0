//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define router metrics (probe results, route actions, API errors)
//! - Expose a Prometheus-compatible scrape endpoint when enabled
//!
//! # Metrics
//! - `anycast_healthcheck_healthy` (gauge): 1=healthy, 0=unhealthy, by healthcheck and destination
//! - `anycast_healthcheck_runs_total` (counter): probes performed, by healthcheck
//! - `anycast_route_actions_total` (counter): reconcile decisions, by action
//! - `anycast_routing_api_errors_total` (counter): failed API calls, by operation
//! - `anycast_remote_probes` (gauge): remote probes currently running
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade, so without an installed
//!   recorder every call is a no-op

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_healthcheck_status(healthcheck: &str, destination: &str, healthy: bool) {
    metrics::gauge!(
        "anycast_healthcheck_healthy",
        "healthcheck" => healthcheck.to_string(),
        "destination" => destination.to_string()
    )
    .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_healthcheck_run(healthcheck: &str) {
    metrics::counter!("anycast_healthcheck_runs_total", "healthcheck" => healthcheck.to_string())
        .increment(1);
}

pub fn record_route_action(action: &'static str) {
    metrics::counter!("anycast_route_actions_total", "action" => action).increment(1);
}

pub fn record_api_error(operation: &'static str) {
    metrics::counter!("anycast_routing_api_errors_total", "operation" => operation).increment(1);
}

pub fn record_remote_probes(count: usize) {
    metrics::gauge!("anycast_remote_probes").set(count as f64);
}
