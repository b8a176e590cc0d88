//! Applying a validated configuration to a registry.
//!
//! Everything goes through the control surface: create, then each setting,
//! then enable. Pools come first so services can name them.

use crate::config::loader::ConfigError;
use crate::config::schema::ProxyConfig;
use crate::control::registry::ordered_settings;
use crate::control::{Configurable, ControlError, Registry};

fn context(target: String) -> impl FnOnce(ControlError) -> ConfigError {
    move |source| ConfigError::Apply { target, source }
}

/// Create, configure and enable every pool and service in `config`.
///
/// Stops at the first failure. A listener that cannot be bound still leaves
/// the service registered and enabled, but the error is returned.
pub fn apply_config(registry: &Registry, config: &ProxyConfig) -> Result<(), ConfigError> {
    for (key, value) in &config.service_defaults {
        registry.set_service_default(key, value);
    }

    for pool_config in &config.pools {
        let target = format!("pool {}", pool_config.name);
        let pool = registry
            .create_pool(&pool_config.name)
            .map_err(context(target.clone()))?;
        for (key, value) in ordered_settings(&pool_config.settings) {
            pool.set(key, value).map_err(context(format!("{target} {key}")))?;
        }
        pool.enable().map_err(context(target))?;
    }

    for service_config in &config.services {
        let target = format!("service {}", service_config.name);
        let service = registry
            .create_service(&service_config.name)
            .map_err(context(target.clone()))?;
        for (key, value) in ordered_settings(&service_config.settings) {
            service.set(key, value).map_err(context(format!("{target} {key}")))?;
        }
        if service_config.enabled {
            service.enable().map_err(context(target))?;
        }
    }

    tracing::info!(
        pools = config.pools.len(),
        services = config.services.len(),
        "Configuration applied"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::config::RuntimeConfig;
    use crate::service::ServiceRole;

    #[tokio::test]
    async fn applies_pools_then_services() {
        let dir = tempfile::tempdir().unwrap();
        let config = parse_config(&format!(
            r#"
            [service_defaults]
            docroot = "{}"

            [[pools]]
            name = "web"
            settings = {{ balance = "least_conn" }}

            [[services]]
            name = "front"
            settings = {{ role = "reverse_proxy", pool = "web", listen = "127.0.0.1:0" }}

            [[services]]
            name = "static"
            enabled = false
            "#,
            dir.path().display()
        ))
        .unwrap();

        let registry = Registry::new(RuntimeConfig::default());
        apply_config(&registry, &config).unwrap();

        let pool = registry.pool("web").unwrap();
        assert!(pool.is_enabled());

        let front = registry.service("front").unwrap();
        assert_eq!(front.role(), ServiceRole::ReverseProxy);
        assert!(front.is_enabled());
        assert_eq!(front.local_addrs().len(), 1);
        assert!(std::sync::Arc::ptr_eq(&front.pool().unwrap(), &pool));

        let stat = registry.service("static").unwrap();
        assert!(!stat.is_enabled());
        assert!(stat.docroot().is_some());

        registry.shutdown();
    }

    #[tokio::test]
    async fn failure_names_the_setting() {
        let config = parse_config(
            r#"
            [[services]]
            name = "front"
            settings = { docroot = "/definitely/not/here" }
            "#,
        )
        .unwrap();

        let registry = Registry::new(RuntimeConfig::default());
        let err = apply_config(&registry, &config).unwrap_err();
        assert!(matches!(err, ConfigError::Apply { .. }));
        assert!(err.to_string().starts_with("service front docroot: "));
        registry.shutdown();
    }
}
