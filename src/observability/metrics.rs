//! Metrics collection and exposition.
//!
//! # Metrics
//! - `aggregator_pending_backends` (gauge): identities awaiting first availability, by gate
//! - `aggregator_registrations_total` (counter): submissions by outcome
//! - `aggregator_status_events_total` (counter): status events by availability
//! - `aggregator_backend_available` (gauge): 1=available, 0=unavailable
//! - `aggregator_proxy_requests_total` (counter): forwarded requests by method, status, backend
//! - `aggregator_proxy_request_duration_seconds` (histogram): forwarding latency
//!
//! Recording without an installed exporter is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter with an HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_pending_backends(gate: &str, pending: usize) {
    gauge!("aggregator_pending_backends", "gate" => gate.to_string()).set(pending as f64);
}

pub fn record_registration(outcome: &'static str) {
    counter!("aggregator_registrations_total", "outcome" => outcome).increment(1);
}

pub fn record_status_event(available: bool) {
    counter!("aggregator_status_events_total", "available" => available.to_string()).increment(1);
}

pub fn record_backend_available(backend: &str, available: bool) {
    gauge!("aggregator_backend_available", "backend" => backend.to_string())
        .set(if available { 1.0 } else { 0.0 });
}

pub fn record_proxy_request(method: &str, status: u16, backend: &str, start: Instant) {
    counter!(
        "aggregator_proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "backend" => backend.to_string()
    )
    .increment(1);
    histogram!("aggregator_proxy_request_duration_seconds", "backend" => backend.to_string())
        .record(start.elapsed().as_secs_f64());
}
