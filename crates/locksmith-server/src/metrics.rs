// Metrics for the lock server
// Lock table counters are recorded by locksmith-core; this module describes
// them and owns the request and connection metrics.

use std::net::SocketAddr;
use std::time::Instant;

use anyhow::Context;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Initialize all metric descriptions
/// Should be called once at application startup
pub fn init_metrics() {
    // Request metrics
    describe_counter!(
        "locksmith_requests_total",
        "Total number of lock protocol requests handled"
    );
    describe_histogram!(
        "locksmith_request_duration_seconds",
        "Time spent executing a lock protocol request"
    );
    describe_counter!(
        "locksmith_protocol_errors_total",
        "Total number of malformed or oversized request frames"
    );

    // Connection metrics
    describe_counter!(
        "locksmith_connections_total",
        "Total number of accepted client connections"
    );
    describe_gauge!(
        "locksmith_connections_active",
        "Number of currently open client connections"
    );

    // Lock table metrics
    describe_counter!(
        "locksmith_locks_created_total",
        "Total number of lock records created"
    );
    describe_gauge!(
        "locksmith_locks_active",
        "Number of locks held by at least one owner"
    );
    describe_counter!("locksmith_lock_grants_total", "Total number of granted lock requests");
    describe_counter!("locksmith_lock_denials_total", "Total number of denied lock requests");
    describe_counter!("locksmith_lock_releases_total", "Total number of successful releases");
    describe_counter!(
        "locksmith_lock_release_failures_total",
        "Total number of releases by clients that were not owners"
    );
    describe_counter!(
        "locksmith_lock_expirations_total",
        "Total number of locks released by lease expiry"
    );

    tracing::info!("Metrics initialized");
}

/// Serve the Prometheus scrape endpoint on `addr`.
pub fn install_prometheus_exporter(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("failed to install Prometheus exporter on {addr}"))?;
    tracing::info!(addr = %addr, "Prometheus exporter listening");
    Ok(())
}

/// Record a handled request
pub fn record_request(command: &'static str, success: bool, duration_secs: f64) {
    let outcome = if success { "success" } else { "failure" };
    counter!("locksmith_requests_total", "command" => command, "outcome" => outcome).increment(1);
    histogram!("locksmith_request_duration_seconds", "command" => command).record(duration_secs);
}

/// Record a frame that could not be turned into a command
pub fn record_protocol_error() {
    counter!("locksmith_protocol_errors_total").increment(1);
}

/// Timer helper for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
