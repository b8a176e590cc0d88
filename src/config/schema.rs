//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Root configuration for switchyard.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Timeouts, queue sizes and background task tuning.
    pub runtime: RuntimeConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Settings applied to every service when it is created.
    pub service_defaults: BTreeMap<String, String>,

    /// Pool definitions, applied before services.
    pub pools: Vec<PoolConfig>,

    /// Service definitions.
    pub services: Vec<ServiceConfig>,
}

/// Settings shared by every service and pool created from one registry.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Outbound backend dial timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Interval between node-file checks in seconds.
    pub reconcile_interval_secs: u64,

    /// How long a request waits for a backend connection in milliseconds.
    pub backend_wait_ms: u64,

    /// Capacity of each pool's ready-connection queue.
    pub ready_queue_capacity: usize,

    /// Capacity of each service's inbound request queue.
    pub request_queue_capacity: usize,

    /// Largest accepted request body.
    pub max_body_bytes: usize,

    /// Keep pools pre-connected ahead of demand.
    pub lookahead_enabled: bool,

    /// Look-ahead tick in milliseconds.
    pub lookahead_interval_ms: u64,

    /// Ready connections the look-ahead spawner aims to keep per pool.
    pub lookahead_target: usize,
}

impl RuntimeConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn backend_wait(&self) -> Duration {
        Duration::from_millis(self.backend_wait_ms)
    }

    pub fn lookahead_interval(&self) -> Duration {
        Duration::from_millis(self.lookahead_interval_ms)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 3_000,
            reconcile_interval_secs: 10,
            backend_wait_ms: 3_000,
            ready_queue_capacity: 1_000,
            request_queue_capacity: 1_024,
            max_body_bytes: 8 * 1024 * 1024,
            lookahead_enabled: false,
            lookahead_interval_ms: 500,
            lookahead_target: 4,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format: "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// One `[[pools]]` entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Unique pool name.
    pub name: String,

    /// Key/value pairs passed to the pool's `set`, e.g. `nodefile`.
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

/// One `[[services]]` entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Unique service name.
    pub name: String,

    /// Key/value pairs passed to the service's `set`: `role`, `listen`, ...
    #[serde(default)]
    pub settings: BTreeMap<String, String>,

    /// Enable the service after configuring it.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}
