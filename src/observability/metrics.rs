//! Metrics collection and exposition.
//!
//! # Metrics
//! - `capture_messages_total` (counter): completed captures by protocol, status
//! - `capture_elapsed_seconds` (histogram): request-to-completion latency
//! - `capture_client_aborts_total` (counter): clients gone before completion
//! - `capture_in_flight` (gauge): open correlation states
//! - `breakpoint_events_total` (counter): holds by outcome
//! - `bus_viewers` (gauge): connected viewers
//! - `bus_batches_total` (counter): batches pushed to viewers
//! - `bus_dropped_messages_total` (counter): Messages dropped from full viewer queues
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so tests need no setup
//! - The Prometheus exporter is opt-in via `observability.metrics_enabled`

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_capture(protocol: &str, status: u16, elapsed: Duration) {
    counter!(
        "capture_messages_total",
        "protocol" => protocol.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("capture_elapsed_seconds").record(elapsed.as_secs_f64());
}

pub fn record_client_abort() {
    counter!("capture_client_aborts_total").increment(1);
}

pub fn set_in_flight(count: usize) {
    gauge!("capture_in_flight").set(count as f64);
}

/// `outcome` is one of `held`, `approved`, `edited`, `timeout`.
pub fn record_breakpoint(outcome: &'static str) {
    counter!("breakpoint_events_total", "outcome" => outcome).increment(1);
}

pub fn set_viewers(count: usize) {
    gauge!("bus_viewers").set(count as f64);
}

pub fn record_bus_batch() {
    counter!("bus_batches_total").increment(1);
}

pub fn record_bus_dropped(count: u64) {
    counter!("bus_dropped_messages_total").increment(count);
}
