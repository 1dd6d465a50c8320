//! Metrics collection and exposition.
//!
//! # Metrics
//! - `shield_requests_total` (counter): responses by status
//! - `shield_rejections_total` (counter): short-circuits by pipeline stage
//! - `shield_security_events_total` (counter): audit events by name
//! - `shield_store_errors_total` (counter): counter-store faults by store
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed
//! - Labels are low-cardinality (no paths, no client identities)

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(status: u16) {
    metrics::counter!("shield_requests_total", "status" => status.to_string()).increment(1);
}

pub fn record_rejection(stage: &'static str) {
    metrics::counter!("shield_rejections_total", "stage" => stage).increment(1);
}

pub fn record_security_event(event: &str) {
    metrics::counter!("shield_security_events_total", "event" => event.to_string()).increment(1);
}

pub fn record_store_error(store: &'static str) {
    metrics::counter!("shield_store_errors_total", "store" => store).increment(1);
}
