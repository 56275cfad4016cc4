//! Prometheus metrics for the collector
//!
//! Recorded through the `metrics` facade; they are no-ops until a recorder
//! is installed.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge};

pub const OUTCOME_OK: &str = "ok";
pub const OUTCOME_ERROR: &str = "error";

pub fn record_rpc_call(method: &str, outcome: &str) {
    counter!("logsync_rpc_calls_total", "method" => method.to_string(), "outcome" => outcome.to_string())
        .increment(1);
}

pub fn record_failover_exhausted(method: &str) {
    counter!("logsync_failovers_total", "method" => method.to_string()).increment(1);
}

pub fn set_endpoint_status(url: &str, weight: u32, latency: Option<Duration>) {
    gauge!("logsync_endpoint_weight", "url" => url.to_string()).set(weight as f64);
    // unreachable endpoints report -1
    let seconds = latency.map_or(-1.0, |l| l.as_secs_f64());
    gauge!("logsync_endpoint_latency_seconds", "url" => url.to_string()).set(seconds);
}

pub fn record_events_stored(count: u64) {
    counter!("logsync_events_stored_total").increment(count);
}

pub fn set_scan_block(block: u64) {
    gauge!("logsync_scan_block").set(block as f64);
}

pub fn set_deployment_block(block: u64) {
    gauge!("logsync_deployment_block").set(block as f64);
}

/// Serve `/metrics` on `addr`; must be called inside a tokio runtime
pub fn install_prometheus_exporter(
    addr: SocketAddr,
) -> Result<(), metrics_exporter_prometheus::BuildError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
}
