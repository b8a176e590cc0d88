//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single backend server by its `host:port` address
//! - Record the reconciliation generation that last saw it
//! - Single-flight connection establishment
//! - Track outstanding requests (for Least Connections selection)

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use crate::http::BackendConnection;
use crate::observability::metrics;

/// Everything a dial task needs to hand its result back to the pool.
#[derive(Clone)]
pub struct DialContext {
    /// Owning pool name, for logs and metrics.
    pub pool: Arc<str>,
    /// The pool's ready queue.
    pub ready: mpsc::Sender<BackendConnection>,
    /// Signalled whenever a dial fails.
    pub failed: Arc<Notify>,
    /// Connect deadline.
    pub timeout: Duration,
}

/// A single backend server.
#[derive(Debug)]
pub struct Backend {
    /// The `host:port` address of the backend.
    addr: String,
    /// Generation of the last node-file pass that listed this address.
    generation: AtomicU64,
    /// Requests currently in flight on this backend's connections.
    outstanding: AtomicUsize,
    /// Dials started over the backend's lifetime.
    dial_attempts: AtomicU64,
    /// Set once a pass drops the address from the node file.
    retired: AtomicBool,
    /// The in-flight dial, if any. Guards single-flight connects.
    connecting: Mutex<Option<JoinHandle<()>>>,
}

impl Backend {
    /// Create a new backend first seen in `generation`.
    pub fn new(addr: impl Into<String>, generation: u64) -> Self {
        Self {
            addr: addr.into(),
            generation: AtomicU64::new(generation),
            outstanding: AtomicUsize::new(0),
            dial_attempts: AtomicU64::new(0),
            retired: AtomicBool::new(false),
            connecting: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Stamp the backend as present in `generation`.
    pub fn refresh(&self, generation: u64) {
        self.generation.store(generation, Ordering::SeqCst);
    }

    /// Mark the backend as dropped from the node file.
    ///
    /// Existing connections finish their requests; none are returned for reuse.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Get the current number of outstanding requests.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }

    pub fn dial_attempts(&self) -> u64 {
        self.dial_attempts.load(Ordering::SeqCst)
    }

    /// Count a request as outstanding until the guard drops.
    pub fn begin_request(self: &Arc<Self>) -> OutstandingGuard {
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        OutstandingGuard {
            backend: Arc::clone(self),
        }
    }

    /// True while a dial for this backend has not finished.
    pub fn is_connecting(&self) -> bool {
        let in_flight = self.connecting.lock().unwrap_or_else(PoisonError::into_inner);
        in_flight.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Start establishing a connection unless one is already in progress.
    ///
    /// Returns immediately; the dial runs on its own task and delivers the
    /// connection to the pool's ready queue. Returns `false` when a dial was
    /// already in flight and this call did nothing.
    pub fn connect(self: &Arc<Self>, ctx: &DialContext) -> bool {
        let mut in_flight = self.connecting.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight.as_ref().is_some_and(|task| !task.is_finished()) {
            return false;
        }

        self.dial_attempts.fetch_add(1, Ordering::SeqCst);
        *in_flight = Some(tokio::spawn(establish(Arc::clone(self), ctx.clone())));
        true
    }
}

async fn establish(backend: Arc<Backend>, ctx: DialContext) {
    match BackendConnection::open(Arc::clone(&backend), ctx.timeout).await {
        Ok(conn) => {
            metrics::record_dial(&ctx.pool, true);
            tracing::debug!(pool = %ctx.pool, addr = %backend.addr, "Backend connection ready");
            if ctx.ready.try_send(conn).is_err() {
                tracing::debug!(pool = %ctx.pool, addr = %backend.addr, "Ready queue full, dropping connection");
            }
        }
        Err(e) => {
            metrics::record_dial(&ctx.pool, false);
            tracing::warn!(pool = %ctx.pool, addr = %backend.addr, error = %e, "Backend connect failed");
            ctx.failed.notify_waiters();
        }
    }
}

/// A RAII guard that manages the outstanding request count.
#[derive(Debug)]
pub struct OutstandingGuard {
    backend: Arc<Backend>,
}

impl Drop for OutstandingGuard {
    fn drop(&mut self) {
        self.backend.outstanding.fetch_sub(1, Ordering::Relaxed);
    }
}
