//! Services: named endpoints with a role.
//!
//! # Data Flow
//! ```text
//! Listener accept
//!     → Service::accept (role picks the acceptor)
//!         - management → management line pump
//!         - web_server / reverse_proxy → HTTP pump
//!     → Service::handle_request (enqueue with a one-shot reply slot)
//!     → dispatch.rs (one loop per service)
//!         - web_server → files.rs on its own task
//!         - reverse_proxy → Pool::get_backend → BackendConnection::send
//! ```
//!
//! # Design Decisions
//! - The role is fixed once the service has accepted traffic
//! - Changing `listen` closes every listener and binds the new set
//! - Every enqueued request gets exactly one response

pub mod dispatch;
pub mod files;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use crate::config::RuntimeConfig;
use crate::control::registry::RegistryInner;
use crate::control::{ComponentKind, Configurable, ControlError, Registry};
use crate::http::{ClientInfo, Request, Response};
use crate::net::{Acceptor, ConnectionTracker, Listener, ListenerError, Rejected};
use crate::observability::metrics;
use crate::pool::Pool;

pub use dispatch::ServiceRequest;

/// Error type for service configuration and request intake.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("service {0:?} already exists")]
    DuplicateName(String),

    #[error("invalid role {0:?}")]
    InvalidRole(String),

    #[error("role cannot change once the service has accepted traffic")]
    RoleLocked,

    #[error("docroot {path}: {reason}")]
    BadDocroot { path: String, reason: String },

    #[error("pool {0:?} not found")]
    PoolNotFound(String),

    #[error("request queue closed")]
    QueueClosed,

    #[error("URI escaped from root")]
    PathEscape,

    #[error(transparent)]
    Listen(#[from] ListenerError),
}

/// What a service does with its traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceRole {
    #[default]
    WebServer,
    ReverseProxy,
    Management,
}

impl FromStr for ServiceRole {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "web_server" => Ok(ServiceRole::WebServer),
            "reverse_proxy" => Ok(ServiceRole::ReverseProxy),
            "management" => Ok(ServiceRole::Management),
            other => Err(ServiceError::InvalidRole(other.to_string())),
        }
    }
}

impl std::fmt::Display for ServiceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServiceRole::WebServer => "web_server",
            ServiceRole::ReverseProxy => "reverse_proxy",
            ServiceRole::Management => "management",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
struct ServiceState {
    role: ServiceRole,
    docroot: Option<PathBuf>,
    pool: Option<Arc<Pool>>,
    /// Configured addresses; `None` until bound.
    listeners: BTreeMap<String, Option<Listener>>,
    enabled: bool,
}

/// A named endpoint.
pub struct Service {
    name: Arc<str>,
    settings: Arc<RuntimeConfig>,
    state: Mutex<ServiceState>,
    queue_tx: mpsc::Sender<ServiceRequest>,
    registry: Weak<RegistryInner>,
    tracker: ConnectionTracker,
    traffic_started: AtomicBool,
    me: Weak<Service>,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("role", &state.role)
            .field("enabled", &state.enabled)
            .field("listeners", &state.listeners.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Service {
    /// Create a service in the web-server role and start its dispatch loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub(crate) fn new(name: &str, registry: &Registry) -> Arc<Self> {
        let settings = Arc::clone(registry.settings());
        let (queue_tx, queue_rx) = mpsc::channel(settings.request_queue_capacity.max(1));

        let service = Arc::new_cyclic(|me| Self {
            name: Arc::from(name),
            settings,
            state: Mutex::new(ServiceState::default()),
            queue_tx,
            registry: registry.downgrade(),
            tracker: ConnectionTracker::new(),
            traffic_started: AtomicBool::new(false),
            me: me.clone(),
        });

        tokio::spawn(dispatch::run(
            Arc::downgrade(&service),
            queue_rx,
            registry.shutdown_signal().clone(),
        ));
        service
    }

    fn state(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &Arc<RuntimeConfig> {
        &self.settings
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    pub(crate) fn registry(&self) -> Option<Registry> {
        Registry::upgrade(&self.registry)
    }

    pub fn role(&self) -> ServiceRole {
        self.state().role
    }

    pub fn docroot(&self) -> Option<PathBuf> {
        self.state().docroot.clone()
    }

    pub fn pool(&self) -> Option<Arc<Pool>> {
        self.state().pool.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.state().enabled
    }

    /// Configured listen addresses.
    pub fn listen_addrs(&self) -> Vec<String> {
        self.state().listeners.keys().cloned().collect()
    }

    /// Locally bound addresses of the listeners that are up.
    pub fn local_addrs(&self) -> Vec<std::net::SocketAddr> {
        self.state()
            .listeners
            .values()
            .flatten()
            .filter(|l| l.is_alive())
            .map(Listener::local_addr)
            .collect()
    }

    fn set_role(&self, value: &str) -> Result<(), ServiceError> {
        let role: ServiceRole = value.parse()?;
        let mut state = self.state();
        if role != state.role && self.traffic_started.load(Ordering::SeqCst) {
            return Err(ServiceError::RoleLocked);
        }
        state.role = role;
        Ok(())
    }

    fn set_docroot(&self, value: &str) -> Result<(), ServiceError> {
        let value = value.trim();
        let bad = |reason: String| ServiceError::BadDocroot {
            path: value.to_string(),
            reason,
        };
        let path = std::fs::canonicalize(value).map_err(|e| bad(e.to_string()))?;
        if !path.is_dir() {
            return Err(bad("not a directory".to_string()));
        }
        self.state().docroot = Some(path);
        Ok(())
    }

    fn set_pool(&self, value: &str) -> Result<(), ServiceError> {
        let name = value.trim();
        let pool = self
            .registry()
            .and_then(|registry| registry.pool(name))
            .ok_or_else(|| ServiceError::PoolNotFound(name.to_string()))?;
        self.state().pool = Some(pool);
        Ok(())
    }

    /// Replace the listen set. All current listeners close first.
    ///
    /// When the service is enabled, an address whose socket is already held
    /// by one of the closed listeners takes that socket over instead of
    /// binding it again.
    fn set_listen(&self, value: &str) -> Result<(), ServiceError> {
        let (enabled, mut previous) = {
            let mut state = self.state();
            if !state.listeners.is_empty() {
                tracing::warn!(service = %self.name, "Replacing existing listeners");
            }
            let previous: Vec<Listener> = std::mem::take(&mut state.listeners)
                .into_values()
                .flatten()
                .filter(Listener::is_alive)
                .collect();
            for addr in value.split(',').map(str::trim).filter(|a| !a.is_empty()) {
                tracing::debug!(service = %self.name, addr = %addr, "Listen address configured");
                state.listeners.insert(addr.to_string(), None);
            }
            (state.enabled, previous)
        };

        if !enabled {
            for listener in previous {
                listener.close();
            }
            return Ok(());
        }
        let result = self.bind_listeners_from(&mut previous);
        for listener in previous {
            listener.close();
        }
        result
    }

    /// Bind every configured address that is not bound yet.
    ///
    /// Keeps going after a failure; the first failure is returned.
    fn bind_listeners(&self) -> Result<(), ServiceError> {
        self.bind_listeners_from(&mut Vec::new())
    }

    /// As [`bind_listeners`](Self::bind_listeners), reusing sockets from
    /// `previous` where the address matches. Reused listeners are removed
    /// from `previous`.
    fn bind_listeners_from(&self, previous: &mut Vec<Listener>) -> Result<(), ServiceError> {
        let mut state = self.state();
        let mut first_err = None;

        for (addr, slot) in state.listeners.iter_mut() {
            if slot.as_ref().is_some_and(Listener::is_alive) {
                continue;
            }
            let held = Listener::resolve(addr)
                .ok()
                .and_then(|wanted| previous.iter().position(|l| l.local_addr() == wanted));
            if let Some(index) = held {
                *slot = Some(Listener::take_over(previous.swap_remove(index), addr, self.acceptor()));
                continue;
            }
            match Listener::bind(addr, self.acceptor()) {
                Ok(listener) => *slot = Some(listener),
                Err(e) => {
                    tracing::error!(service = %self.name, addr = %addr, error = %e, "Failed to listen");
                    first_err.get_or_insert(e);
                }
            }
        }

        match first_err {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn acceptor(&self) -> Acceptor {
        let me = self.me.clone();
        Arc::new(move |stream, listen_addr| match me.upgrade() {
            Some(service) => service.accept(stream, listen_addr),
            None => Err(Rejected::new(stream, "service is gone")),
        })
    }

    /// Hand an accepted socket to the acceptor for the current role.
    pub fn accept(self: &Arc<Self>, stream: TcpStream, listen_addr: &str) -> Result<(), Rejected> {
        self.traffic_started.store(true, Ordering::SeqCst);
        metrics::record_accept(&self.name);

        match self.role() {
            ServiceRole::Management => crate::management::spawn(stream, Arc::clone(self), listen_addr),
            ServiceRole::WebServer | ServiceRole::ReverseProxy => {
                crate::http::acceptor::spawn(stream, Arc::clone(self), listen_addr)
            }
        }
        Ok(())
    }

    /// Queue a request for the dispatch loop.
    ///
    /// On `Ok`, exactly one response will arrive on `responder`. On `Err`
    /// nothing was queued and the caller answers the client itself.
    pub async fn handle_request(
        &self,
        client: ClientInfo,
        request: Request,
        responder: oneshot::Sender<Response>,
    ) -> Result<(), ServiceError> {
        self.traffic_started.store(true, Ordering::SeqCst);
        self.queue_tx
            .send(ServiceRequest::new(client, request, responder))
            .await
            .map_err(|_| ServiceError::QueueClosed)
    }

    /// Close every bound listener. Configured addresses are kept.
    pub fn close_listeners(&self) {
        let mut state = self.state();
        for slot in state.listeners.values_mut() {
            if let Some(listener) = slot.take() {
                listener.close();
            }
        }
    }
}

impl Configurable for Service {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Service
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ControlError> {
        match key {
            "listen" => self.set_listen(value)?,
            "role" => self.set_role(value)?,
            "docroot" => self.set_docroot(value)?,
            "pool" => self.set_pool(value)?,
            _ => {
                tracing::error!(service = %self.name, key = %key, value = %value, "Unknown service setting ignored");
            }
        }
        Ok(())
    }

    fn enable(&self) -> Result<(), ControlError> {
        let result = self.bind_listeners();
        let newly = {
            let mut state = self.state();
            !std::mem::replace(&mut state.enabled, true)
        };
        if newly {
            tracing::info!(service = %self.name, role = %self.role(), "Service enabled");
        }
        result.map_err(ControlError::from)
    }
}
