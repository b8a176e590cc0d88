//! Backend pool management.
//!
//! # Responsibilities
//! - Own the backend list for one named upstream group
//! - Reconcile that list against the node file
//! - Hand out ready backend connections and take reusable ones back

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::SystemTime;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

use crate::config::RuntimeConfig;
use crate::control::{ComponentKind, Configurable, ControlError};
use crate::http::BackendConnection;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::pool::backend::{Backend, DialContext};
use crate::pool::nodefile::parse_node_list;
use crate::pool::{reconcile, spawner, Balance, LoadBalancer};

/// Error type for pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool {0:?} already exists")]
    DuplicateName(String),

    #[error("node file {}: {source}", .path.display())]
    NodeFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("node file {} is a directory", .0.display())]
    NodeFileIsDirectory(PathBuf),

    #[error("no backend available in pool {pool}")]
    NoBackendAvailable { pool: String },

    #[error("unknown balance strategy {0:?}")]
    UnknownBalance(String),
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No node file configured yet.
    NoNodeFile,
    /// Same file, modification time not advanced.
    Unchanged,
    /// The backend list was rebuilt at `generation`.
    Updated {
        generation: u64,
        added: usize,
        retired: usize,
    },
}

/// What the previous pass observed.
#[derive(Debug, Default)]
struct PassState {
    last_path: Option<PathBuf>,
    last_mtime: Option<SystemTime>,
}

/// A named group of backends fed from a node file.
pub struct Pool {
    name: Arc<str>,
    settings: Arc<RuntimeConfig>,
    node_file: Mutex<Option<PathBuf>>,
    /// Held for the whole reconciliation pass.
    pass: tokio::sync::Mutex<PassState>,
    backends: RwLock<Vec<Arc<Backend>>>,
    generation: AtomicU64,
    ready_tx: mpsc::Sender<BackendConnection>,
    /// Finer-grained than `pass`: request traffic never waits on reconciliation.
    ready_rx: tokio::sync::Mutex<mpsc::Receiver<BackendConnection>>,
    dial_failed: Arc<Notify>,
    wake: Arc<Notify>,
    balancer: RwLock<Arc<dyn LoadBalancer>>,
    enabled: AtomicBool,
    spawner_started: AtomicBool,
    shutdown: Shutdown,
    me: Weak<Pool>,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.name)
            .field("node_file", &self.node_file())
            .field("generation", &self.generation())
            .field("backends", &self.backends().len())
            .field("ready", &self.ready_len())
            .finish()
    }
}

impl Pool {
    /// Create a pool and start its reconciliation loop.
    ///
    /// The loop stays idle until the pool is enabled. Must be called from
    /// within a Tokio runtime.
    pub fn new(name: impl Into<String>, settings: Arc<RuntimeConfig>, shutdown: Shutdown) -> Arc<Self> {
        let name: String = name.into();
        let (ready_tx, ready_rx) = mpsc::channel(settings.ready_queue_capacity.max(1));

        let pool = Arc::new_cyclic(|me| Self {
            name: Arc::from(name.as_str()),
            settings,
            node_file: Mutex::new(None),
            pass: tokio::sync::Mutex::new(PassState::default()),
            backends: RwLock::new(Vec::new()),
            generation: AtomicU64::new(0),
            ready_tx,
            ready_rx: tokio::sync::Mutex::new(ready_rx),
            dial_failed: Arc::new(Notify::new()),
            wake: Arc::new(Notify::new()),
            balancer: RwLock::new(Balance::default().build()),
            enabled: AtomicBool::new(false),
            spawner_started: AtomicBool::new(false),
            shutdown,
            me: me.clone(),
        });

        tokio::spawn(reconcile::run(
            Arc::downgrade(&pool),
            Arc::clone(&pool.wake),
            pool.settings.reconcile_interval(),
            pool.shutdown.clone(),
        ));

        tracing::debug!(pool = %pool.name, "Pool created");
        pool
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// The pool-wide generation of the last pass that changed the backend list.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Snapshot of the current backend list.
    pub fn backends(&self) -> Vec<Arc<Backend>> {
        self.backends.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Connections sitting in the ready queue.
    pub fn ready_len(&self) -> usize {
        self.ready_tx.max_capacity() - self.ready_tx.capacity()
    }

    pub fn node_file(&self) -> Option<PathBuf> {
        self.node_file.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Install a new node file for the reconciliation loop.
    ///
    /// Fails if the path does not exist or is a directory. The previous file,
    /// if any, stays in effect on failure.
    pub fn set_node_file(&self, path: impl AsRef<Path>) -> Result<(), PoolError> {
        let path = PathBuf::from(path.as_ref().to_string_lossy().trim());
        let meta = std::fs::metadata(&path).map_err(|source| PoolError::NodeFile {
            path: path.clone(),
            source,
        })?;
        if meta.is_dir() {
            return Err(PoolError::NodeFileIsDirectory(path));
        }

        tracing::info!(pool = %self.name, node_file = %path.display(), "Node file set");
        *self.node_file.lock().unwrap_or_else(PoisonError::into_inner) = Some(path);
        if self.is_enabled() {
            self.wake.notify_one();
        }
        Ok(())
    }

    pub fn set_balance(&self, balance: Balance) {
        *self.balancer.write().unwrap_or_else(PoisonError::into_inner) = balance.build();
    }

    fn balancer(&self) -> Arc<dyn LoadBalancer> {
        Arc::clone(&self.balancer.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn dial_context(&self) -> DialContext {
        DialContext {
            pool: Arc::clone(&self.name),
            ready: self.ready_tx.clone(),
            failed: Arc::clone(&self.dial_failed),
            timeout: self.settings.connect_timeout(),
        }
    }

    /// Run one reconciliation pass against the node file.
    ///
    /// The backend list only changes when the file's modification time has
    /// advanced (or the path changed) since the last successful pass. A failed
    /// stat or read leaves everything as it was so the next pass retries.
    pub async fn reconcile(&self) -> Result<ReconcileOutcome, PoolError> {
        let mut pass = self.pass.lock().await;

        let Some(path) = self.node_file() else {
            return Ok(ReconcileOutcome::NoNodeFile);
        };
        let file_err = |source| PoolError::NodeFile {
            path: path.clone(),
            source,
        };

        let mtime = tokio::fs::metadata(&path)
            .await
            .and_then(|meta| meta.modified())
            .map_err(file_err)?;
        let same_path = pass.last_path.as_deref() == Some(path.as_path());
        if same_path && pass.last_mtime.is_some_and(|seen| mtime <= seen) {
            return Ok(ReconcileOutcome::Unchanged);
        }

        tracing::debug!(pool = %self.name, node_file = %path.display(), "Node file changed");
        let contents = tokio::fs::read_to_string(&path).await.map_err(file_err)?;
        let generation = self.generation() + 1;

        let current = self.backends();
        let known: HashMap<&str, &Arc<Backend>> = current.iter().map(|b| (b.addr(), b)).collect();
        let mut seen = HashSet::new();
        let mut next = Vec::new();
        let mut added = 0;

        for addr in parse_node_list(&contents) {
            if !seen.insert(addr.clone()) {
                tracing::debug!(pool = %self.name, addr = %addr, "Duplicate node file entry");
                continue;
            }
            match known.get(addr.as_str()) {
                Some(existing) => {
                    existing.refresh(generation);
                    next.push(Arc::clone(existing));
                }
                None => {
                    next.push(Arc::new(Backend::new(addr, generation)));
                    added += 1;
                }
            }
        }

        let mut retired = 0;
        for backend in current.iter().filter(|b| b.generation() < generation) {
            tracing::info!(pool = %self.name, addr = %backend.addr(), "Backend retired");
            backend.retire();
            retired += 1;
        }

        let count = next.len();
        *self.backends.write().unwrap_or_else(PoisonError::into_inner) = next;
        self.generation.store(generation, Ordering::SeqCst);
        pass.last_path = Some(path);
        pass.last_mtime = Some(mtime);

        metrics::record_pool_state(&self.name, count, generation);
        tracing::info!(
            pool = %self.name,
            generation = generation,
            backends = count,
            added = added,
            retired = retired,
            "Backend list reconciled"
        );

        Ok(ReconcileOutcome::Updated {
            generation,
            added,
            retired,
        })
    }

    /// Obtain a ready backend connection.
    ///
    /// Takes one from the ready queue when possible. Otherwise dials backends
    /// chosen by the balancing strategy, one at a time, and waits for the first
    /// connection to arrive. Fails with [`PoolError::NoBackendAvailable`] when
    /// the pool is empty, every attempted dial failed, or the configured wait
    /// elapsed.
    pub async fn get_backend(&self) -> Result<BackendConnection, PoolError> {
        let mut ready = self.ready_rx.lock().await;

        while let Ok(mut conn) = ready.try_recv() {
            if usable(&mut conn).await {
                return Ok(conn);
            }
        }

        let backends = self.backends();
        if backends.is_empty() {
            tracing::debug!(pool = %self.name, "No backends known");
            return Err(self.no_backend());
        }

        let ctx = self.dial_context();
        let balancer = self.balancer();
        let deadline = Instant::now() + self.settings.backend_wait();
        let mut attempts_left = backends.len();

        loop {
            let failed = self.dial_failed.notified();
            tokio::pin!(failed);
            failed.as_mut().enable();

            if attempts_left > 0 {
                attempts_left -= 1;
                if let Some(backend) = balancer.next_backend(&backends) {
                    backend.connect(&ctx);
                }
            }

            tokio::select! {
                received = ready.recv() => match received {
                    Some(mut conn) => {
                        if usable(&mut conn).await {
                            return Ok(conn);
                        }
                    }
                    None => break,
                },
                _ = &mut failed => {
                    if attempts_left == 0 {
                        break;
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::debug!(pool = %self.name, "Timed out waiting for a backend connection");
                    break;
                }
            }
        }

        Err(self.no_backend())
    }

    fn no_backend(&self) -> PoolError {
        PoolError::NoBackendAvailable {
            pool: self.name.to_string(),
        }
    }

    /// Return a connection after a completed proxy cycle.
    ///
    /// Connections that cannot carry another request, or whose backend has
    /// been retired, are dropped. So is anything that does not fit the queue.
    pub fn release(&self, conn: BackendConnection) {
        if !conn.is_reusable() || conn.is_closed() || conn.backend().is_retired() {
            return;
        }
        if self.ready_tx.try_send(conn).is_err() {
            tracing::debug!(pool = %self.name, "Ready queue full, dropping connection");
        }
    }

    /// Start dials until `target` connections are ready or in flight.
    ///
    /// Returns how many dials were started.
    pub fn top_up(&self, target: usize) -> usize {
        let have = self.ready_len();
        if have >= target {
            return 0;
        }
        let backends = self.backends();
        if backends.is_empty() {
            return 0;
        }

        let ctx = self.dial_context();
        let balancer = self.balancer();
        let wanted = (target - have).min(backends.len());
        (0..wanted)
            .filter_map(|_| balancer.next_backend(&backends))
            .filter(|backend| backend.connect(&ctx))
            .count()
    }
}

async fn usable(conn: &mut BackendConnection) -> bool {
    !conn.backend().is_retired() && !conn.is_closed() && conn.ready().await.is_ok()
}

impl Configurable for Pool {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Pool
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ControlError> {
        match key {
            "nodefile" => self.set_node_file(value)?,
            "balance" => self.set_balance(value.parse()?),
            _ => {
                tracing::warn!(pool = %self.name, key = %key, value = %value, "Unknown pool setting ignored");
            }
        }
        Ok(())
    }

    fn enable(&self) -> Result<(), ControlError> {
        if !self.enabled.swap(true, Ordering::SeqCst) {
            tracing::info!(pool = %self.name, "Pool enabled");
        }
        self.wake.notify_one();

        if self.settings.lookahead_enabled && !self.spawner_started.swap(true, Ordering::SeqCst) {
            tokio::spawn(spawner::run(
                self.me.clone(),
                self.settings.lookahead_interval(),
                self.settings.lookahead_target,
                self.shutdown.clone(),
            ));
        }
        Ok(())
    }
}
