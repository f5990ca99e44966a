//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (requests, latency, recovered panics)
//! - Optionally expose a Prometheus scrape endpoint
//!
//! # Metrics
//! - `gateway_requests_total` (counter): translated requests by method, route, status
//! - `gateway_request_duration_seconds` (histogram): translation latency
//! - `rpc_handler_panics_total` (counter): panics converted to `Internal`
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Routes are labelled by their registered pattern, never the raw path

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

pub const REQUESTS_TOTAL: &str = "gateway_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "gateway_request_duration_seconds";
pub const HANDLER_PANICS_TOTAL: &str = "rpc_handler_panics_total";

/// Install the Prometheus recorder and its HTTP listener on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record one translated request.
pub fn record_request(method: &str, route: &str, status: u16, started: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("route", route.to_string()),
        ("status", status.to_string()),
    ];
    metrics::counter!(REQUESTS_TOTAL, &labels).increment(1);
    metrics::histogram!(REQUEST_DURATION_SECONDS, &labels).record(started.elapsed().as_secs_f64());
}

pub fn record_panic() {
    metrics::counter!(HANDLER_PANICS_TOTAL).increment(1);
}
