//! Metrics collection and exposition.
//!
//! # Metrics
//! - `switchyard_requests_total` (counter): requests answered, by service and status
//! - `switchyard_request_duration_seconds` (histogram): time from read to response
//! - `switchyard_connections_accepted_total` (counter): accepted sockets, by service
//! - `switchyard_backend_dials_total` (counter): dials by pool and result
//! - `switchyard_pool_backends` (gauge): backends after the last reconciliation
//! - `switchyard_pool_generation` (gauge): the pool's current generation

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to install Prometheus exporter: {0}")]
    Install(#[from] BuildError),
}

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), MetricsError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(service: &str, status: u16, started: Instant) {
    counter!(
        "switchyard_requests_total",
        "service" => service.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("switchyard_request_duration_seconds", "service" => service.to_string())
        .record(started.elapsed().as_secs_f64());
}

pub fn record_accept(service: &str) {
    counter!("switchyard_connections_accepted_total", "service" => service.to_string()).increment(1);
}

pub fn record_dial(pool: &str, success: bool) {
    let result = if success { "ok" } else { "error" };
    counter!("switchyard_backend_dials_total", "pool" => pool.to_string(), "result" => result).increment(1);
}

pub fn record_pool_state(pool: &str, backends: usize, generation: u64) {
    gauge!("switchyard_pool_backends", "pool" => pool.to_string()).set(backends as f64);
    gauge!("switchyard_pool_generation", "pool" => pool.to_string()).set(generation as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_install_is_an_error() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        init_metrics(addr).unwrap();
        record_request("svc", 200, Instant::now());

        let err = init_metrics(addr).unwrap_err();
        assert!(matches!(err, MetricsError::Install(_)));
        assert!(err.to_string().starts_with("failed to install Prometheus exporter"));
    }
}
