//! Metrics collection and exposition.
//!
//! # Metrics
//! - `server_workers_spawned_total` (counter): workers forked, by kind
//! - `server_workers_reaped_total` (counter): workers reaped
//! - `server_workers_timeout_total` (counter): workers killed by the watchdog
//! - `server_workers` (gauge): current pool size, by kind
//! - `server_requests_total` (counter): requests served, by status
//! - `server_cron_runs_total` (counter): database job runs, by outcome

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

pub fn record_worker_spawned(kind: &'static str) {
    metrics::counter!("server_workers_spawned_total", "kind" => kind).increment(1);
}

pub fn record_worker_reaped() {
    metrics::counter!("server_workers_reaped_total").increment(1);
}

pub fn record_worker_timeout(kind: &'static str) {
    metrics::counter!("server_workers_timeout_total", "kind" => kind).increment(1);
}

pub fn set_pool_size(kind: &'static str, size: usize) {
    metrics::gauge!("server_workers", "kind" => kind).set(size as f64);
}

pub fn record_request(status: u16) {
    metrics::counter!("server_requests_total", "status" => status.to_string()).increment(1);
}

pub fn record_cron_run(success: bool) {
    let outcome = if success { "ok" } else { "error" };
    metrics::counter!("server_cron_runs_total", "outcome" => outcome).increment(1);
}

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}
