//! Metrics collection and exposition.
//!
//! # Metrics
//! - `ingress_requests_total` (counter): requests by route, status
//! - `ingress_request_errors_total` (counter): locally generated errors by route, kind
//! - `ingress_request_duration_seconds` (histogram): latency by route
//! - `ingress_upstream_requests_total` (counter): upstream responses by endpoint, status
//! - `ingress_upstream_errors_total` (counter): upstream failures by endpoint, kind
//! - `ingress_endpoint_health` (gauge): 1=healthy, 0=unhealthy, -1=unknown
//! - `ingress_snapshot_version` (gauge): version of the live route snapshot
//! - `ingress_registry_reconnects_total` (counter): registry subscription restarts
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, which keeps tests free of globals
//! - Labels for route, endpoint, status code

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::routing::Health;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    let builder = PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => tracing::info!(address = %addr, "Prometheus exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install Prometheus exporter"),
    }
}

/// Record a finished client request.
pub fn record_request(route: &str, status: u16, start_time: Instant) {
    let route = route.to_string();
    counter!("ingress_requests_total", "route" => route.clone(), "status" => status.to_string())
        .increment(1);
    histogram!("ingress_request_duration_seconds", "route" => route)
        .record(start_time.elapsed().as_secs_f64());
}

/// Record a locally generated error response.
pub fn record_request_error(route: &str, kind: &'static str) {
    counter!("ingress_request_errors_total", "route" => route.to_string(), "kind" => kind)
        .increment(1);
}

pub fn record_upstream(endpoint: SocketAddr, status: u16) {
    counter!(
        "ingress_upstream_requests_total",
        "endpoint" => endpoint.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_upstream_error(endpoint: SocketAddr, kind: &'static str) {
    counter!(
        "ingress_upstream_errors_total",
        "endpoint" => endpoint.to_string(),
        "kind" => kind
    )
    .increment(1);
}

pub fn record_endpoint_health(endpoint: SocketAddr, health: Health) {
    gauge!("ingress_endpoint_health", "endpoint" => endpoint.to_string()).set(health.as_gauge());
}

pub fn record_snapshot_version(version: u64) {
    gauge!("ingress_snapshot_version").set(version as f64);
}

pub fn record_reconnect() {
    counter!("ingress_registry_reconnects_total").increment(1);
}
