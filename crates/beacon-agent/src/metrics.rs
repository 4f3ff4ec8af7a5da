//! Metrics collection and export for the Beacon agent.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format. Counters mirror the client's [`Stats`], which are
//! cumulative, so each export records only the growth since the last one.

use beacon_core::{ConnectionError, ConnectionState, Stats};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const MESSAGES_TOTAL: &str = "beacon_messages_total";
    pub const MESSAGES_BYTES: &str = "beacon_messages_bytes";
    pub const RECONNECT_ATTEMPTS_TOTAL: &str = "beacon_reconnect_attempts_total";
    pub const CONNECTION_STATE: &str = "beacon_connection_state";
    pub const ERRORS_TOTAL: &str = "beacon_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of messages by direction");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total payload bytes by direction");
    metrics::describe_counter!(
        names::RECONNECT_ATTEMPTS_TOTAL,
        "Total number of scheduled reconnection attempts"
    );
    metrics::describe_gauge!(
        names::CONNECTION_STATE,
        "1 for the client's current connection state, 0 for the others"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of connection errors by code");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Mirrors cumulative [`Stats`] snapshots into counters.
#[derive(Debug, Default)]
pub struct StatsExporter {
    last: Stats,
}

impl StatsExporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the growth since the previous snapshot.
    pub fn export(&mut self, stats: &Stats) {
        let delta = delta(&self.last, stats);

        counter!(names::MESSAGES_TOTAL, "direction" => "sent").increment(delta.messages_sent);
        counter!(names::MESSAGES_TOTAL, "direction" => "received")
            .increment(delta.messages_received);
        counter!(names::MESSAGES_BYTES, "direction" => "sent").increment(delta.bytes_sent);
        counter!(names::MESSAGES_BYTES, "direction" => "received")
            .increment(delta.bytes_received);
        counter!(names::RECONNECT_ATTEMPTS_TOTAL).increment(delta.reconnect_attempts);
        record_state(stats.connection_state);

        self.last = stats.clone();
    }
}

fn delta(previous: &Stats, current: &Stats) -> Stats {
    Stats {
        messages_sent: current.messages_sent.saturating_sub(previous.messages_sent),
        messages_received: current
            .messages_received
            .saturating_sub(previous.messages_received),
        bytes_sent: current.bytes_sent.saturating_sub(previous.bytes_sent),
        bytes_received: current.bytes_received.saturating_sub(previous.bytes_received),
        reconnect_attempts: current
            .reconnect_attempts
            .saturating_sub(previous.reconnect_attempts),
        connection_state: current.connection_state,
    }
}

/// Set the state gauge: one series per state, the current one at 1.
pub fn record_state(state: ConnectionState) {
    for candidate in ConnectionState::ALL {
        let value = if candidate == state { 1.0 } else { 0.0 };
        gauge!(names::CONNECTION_STATE, "state" => candidate.as_str()).set(value);
    }
}

/// Record a connection error.
pub fn record_error(error: &ConnectionError) {
    counter!(names::ERRORS_TOTAL, "code" => error.code.clone()).increment(1);
}
