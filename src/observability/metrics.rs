//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, route
//! - `gateway_request_duration_seconds` (histogram): end to end latency
//! - `gateway_invocation_duration_seconds` (histogram): per function
//! - `gateway_invocations_total` (counter): per function and outcome
//! - `gateway_authorizer_decisions_total` (counter): per authorizer and decision
//! - `gateway_websocket_connections` (gauge): open WebSocket connections
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - The Prometheus exporter is opt-in and serves its own listener

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record one HTTP request.
pub fn record_request(method: &str, status: u16, route: &str, started: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
        ("route", route.to_string()),
    ];
    counter!("gateway_requests_total", &labels).increment(1);
    histogram!("gateway_request_duration_seconds", &labels).record(started.elapsed().as_secs_f64());
}

/// Record one function invocation.
pub fn record_invocation(function: &str, ok: bool, elapsed: Duration) {
    let outcome = if ok { "success" } else { "error" };
    counter!("gateway_invocations_total", "function" => function.to_string(), "outcome" => outcome)
        .increment(1);
    histogram!("gateway_invocation_duration_seconds", "function" => function.to_string())
        .record(elapsed.as_secs_f64());
}

/// Record an authorizer decision (`allow`, `deny` or `error`).
pub fn record_authorizer(authorizer: &str, decision: &'static str) {
    counter!(
        "gateway_authorizer_decisions_total",
        "authorizer" => authorizer.to_string(),
        "decision" => decision
    )
    .increment(1);
}

pub fn websocket_connected() {
    gauge!("gateway_websocket_connections").increment(1.0);
}

pub fn websocket_disconnected() {
    gauge!("gateway_websocket_connections").decrement(1.0);
}
