//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (services reference declared pools)
//! - Reject duplicate names and unknown roles or balance strategies
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::observability::logging::LogFormat;
use crate::pool::Balance;
use crate::service::ServiceRole;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("duplicate pool name {0:?}")]
    DuplicatePool(String),

    #[error("duplicate service name {0:?}")]
    DuplicateService(String),

    #[error("service {service:?} references undeclared pool {pool:?}")]
    UnknownPool { service: String, pool: String },

    #[error("{owner:?} has invalid role {role:?}")]
    InvalidRole { owner: String, role: String },

    #[error("pool {pool:?} has unknown balance strategy {balance:?}")]
    InvalidBalance { pool: String, balance: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("invalid log format {0:?}")]
    InvalidLogFormat(String),
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let runtime = &config.runtime;

    for (name, value) in [
        ("runtime.connect_timeout_ms", runtime.connect_timeout_ms),
        ("runtime.reconcile_interval_secs", runtime.reconcile_interval_secs),
        ("runtime.backend_wait_ms", runtime.backend_wait_ms),
        ("runtime.ready_queue_capacity", runtime.ready_queue_capacity as u64),
        ("runtime.request_queue_capacity", runtime.request_queue_capacity as u64),
    ] {
        if value == 0 {
            errors.push(ValidationError::Zero(name));
        }
    }

    if config.observability.log_format.parse::<LogFormat>().is_err() {
        errors.push(ValidationError::InvalidLogFormat(config.observability.log_format.clone()));
    }

    if let Some(role) = config.service_defaults.get("role") {
        if role.parse::<ServiceRole>().is_err() {
            errors.push(ValidationError::InvalidRole {
                owner: "service_defaults".to_string(),
                role: role.clone(),
            });
        }
    }

    let mut pools = HashSet::new();
    for pool in &config.pools {
        if !pools.insert(pool.name.as_str()) {
            errors.push(ValidationError::DuplicatePool(pool.name.clone()));
        }
        if let Some(balance) = pool.settings.get("balance") {
            if balance.parse::<Balance>().is_err() {
                errors.push(ValidationError::InvalidBalance {
                    pool: pool.name.clone(),
                    balance: balance.clone(),
                });
            }
        }
    }

    let mut services = HashSet::new();
    for service in &config.services {
        if !services.insert(service.name.as_str()) {
            errors.push(ValidationError::DuplicateService(service.name.clone()));
        }
        if let Some(role) = service.settings.get("role") {
            if role.parse::<ServiceRole>().is_err() {
                errors.push(ValidationError::InvalidRole {
                    owner: service.name.clone(),
                    role: role.clone(),
                });
            }
        }
        if let Some(pool) = service.settings.get("pool") {
            if !pools.contains(pool.trim()) {
                errors.push(ValidationError::UnknownPool {
                    service: service.name.clone(),
                    pool: pool.clone(),
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
