//! Service and pool registries.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use super::{Component, ComponentKind, Configurable, ControlError};
use crate::config::RuntimeConfig;
use crate::lifecycle::Shutdown;
use crate::pool::{Pool, PoolError};
use crate::service::{Service, ServiceError};

#[derive(Debug)]
pub(crate) struct RegistryInner {
    services: DashMap<String, Arc<Service>>,
    pools: DashMap<String, Arc<Pool>>,
    service_defaults: Mutex<BTreeMap<String, String>>,
    settings: Arc<RuntimeConfig>,
    shutdown: Shutdown,
}

/// Handle to one set of services and pools.
///
/// Cloning is cheap; clones share the same registries. Every background task
/// started through a registry stops on [`Registry::shutdown`].
#[derive(Debug, Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    pub fn new(settings: RuntimeConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                services: DashMap::new(),
                pools: DashMap::new(),
                service_defaults: Mutex::new(BTreeMap::new()),
                settings: Arc::new(settings),
                shutdown: Shutdown::new(),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<RegistryInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(inner: &Weak<RegistryInner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    pub fn settings(&self) -> &Arc<RuntimeConfig> {
        &self.inner.settings
    }

    pub fn shutdown_signal(&self) -> &Shutdown {
        &self.inner.shutdown
    }

    /// Register a new pool. Fails if the name is taken.
    pub fn create_pool(&self, name: &str) -> Result<Arc<Pool>, ControlError> {
        match self.inner.pools.entry(name.to_string()) {
            Entry::Occupied(_) => Err(PoolError::DuplicateName(name.to_string()).into()),
            Entry::Vacant(slot) => {
                let pool = Pool::new(name, Arc::clone(&self.inner.settings), self.inner.shutdown.clone());
                slot.insert(Arc::clone(&pool));
                tracing::info!(pool = %name, "Pool registered");
                Ok(pool)
            }
        }
    }

    /// Register a new service and apply the current service defaults to it.
    ///
    /// A default that fails to apply is logged and skipped.
    pub fn create_service(&self, name: &str) -> Result<Arc<Service>, ControlError> {
        let service = match self.inner.services.entry(name.to_string()) {
            Entry::Occupied(_) => return Err(ServiceError::DuplicateName(name.to_string()).into()),
            Entry::Vacant(slot) => {
                let service = Service::new(name, self);
                slot.insert(Arc::clone(&service));
                service
            }
        };
        tracing::info!(service = %name, "Service registered");

        let defaults = self.service_defaults();
        for (key, value) in ordered_settings(&defaults) {
            if let Err(e) = service.set(key, value) {
                tracing::warn!(service = %name, key = %key, error = %e, "Service default not applied");
            }
        }
        Ok(service)
    }

    pub fn service(&self, name: &str) -> Option<Arc<Service>> {
        self.inner.services.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn pool(&self, name: &str) -> Option<Arc<Pool>> {
        self.inner.pools.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Look up either kind of component.
    pub fn component(&self, kind: ComponentKind, name: &str) -> Result<Component, ControlError> {
        let found = match kind {
            ComponentKind::Service => self.service(name).map(Component::Service),
            ComponentKind::Pool => self.pool(name).map(Component::Pool),
        };
        found.ok_or_else(|| ControlError::NotFound {
            kind,
            name: name.to_string(),
        })
    }

    /// Registered service names, sorted.
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.services.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Registered pool names, sorted.
    pub fn pool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.pools.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Set a default applied to services created from now on.
    /// An empty value removes the default.
    pub fn set_service_default(&self, key: &str, value: &str) {
        let mut defaults = self.inner.service_defaults.lock().unwrap_or_else(PoisonError::into_inner);
        let value = value.trim();
        if value.is_empty() {
            defaults.remove(key);
        } else {
            defaults.insert(key.to_string(), value.to_string());
        }
    }

    pub fn service_defaults(&self) -> BTreeMap<String, String> {
        self.inner
            .service_defaults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stop every background task and close every listener.
    pub fn shutdown(&self) {
        tracing::info!("Registry shutting down");
        self.inner.shutdown.trigger();
        for entry in self.inner.services.iter() {
            entry.value().close_listeners();
        }
    }
}

/// Settings in apply order: `role` first, then the rest by key.
pub fn ordered_settings(settings: &BTreeMap<String, String>) -> impl Iterator<Item = (&str, &str)> {
    let role = settings.get_key_value("role");
    role.into_iter()
        .chain(settings.iter().filter(|(key, _)| key.as_str() != "role"))
        .map(|(key, value)| (key.as_str(), value.as_str()))
}
