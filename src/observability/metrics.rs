//! Metrics collection and exposition.
//!
//! # Metrics
//! - `loolwsd_requests_total` (counter): inbound HTTP requests by method
//! - `loolwsd_handshake_rejections_total` (counter): 400 responses by reason
//! - `loolwsd_connections_total` (counter): upgraded connections
//! - `loolwsd_active_sessions` (gauge): sessions currently open
//! - `loolwsd_frames_received_total` (counter): chunks forwarded to sessions
//! - `loolwsd_frame_bytes_received_total` (counter): bytes forwarded to sessions
//! - `loolwsd_connection_duration_seconds` (histogram): open→closed, by closure
//!
//! Without an installed recorder every call here is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str) {
    counter!("loolwsd_requests_total", "method" => method.to_string()).increment(1);
}

pub fn record_rejection(reason: &'static str) {
    counter!("loolwsd_handshake_rejections_total", "reason" => reason).increment(1);
}

pub fn record_connection_opened() {
    counter!("loolwsd_connections_total").increment(1);
}

pub fn record_connection_closed(closure: &'static str, opened_at: Instant) {
    histogram!("loolwsd_connection_duration_seconds", "closure" => closure)
        .record(opened_at.elapsed().as_secs_f64());
}

pub fn record_session_opened() {
    gauge!("loolwsd_active_sessions").increment(1.0);
}

pub fn record_session_closed() {
    gauge!("loolwsd_active_sessions").decrement(1.0);
}

pub fn record_frame(bytes: usize) {
    counter!("loolwsd_frames_received_total").increment(1);
    counter!("loolwsd_frame_bytes_received_total").increment(bytes as u64);
}
