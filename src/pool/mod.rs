//! Backend pool subsystem.
//!
//! # Data Flow
//! ```text
//! node file (operator edited)
//!     → reconcile.rs (periodic stat, re-read on mtime change)
//!     → nodefile.rs (one address per line)
//!     → pool.rs (refresh/create Backends, retire stale ones)
//!
//! Service dispatch loop
//!     → Pool::get_backend()
//!         - ready queue has a connection → use it
//!         - otherwise pick a Backend:
//!             - round_robin.rs (rotate through backends)
//!             - least_conn.rs (fewest outstanding requests)
//!         → backend.rs Backend::connect() (single-flight dial)
//!         → wait on the ready queue (bounded)
//!     → proxy cycle → Pool::release() puts the connection back
//! ```
//!
//! # Design Decisions
//! - The reconciliation pass holds the pool's pass lock end to end;
//!   `get_backend` only takes the ready-queue lock and a backend-list snapshot
//! - A dial in flight is per-backend state, never pool-wide
//! - Backends dropped from the node file are retired, not disconnected

pub mod backend;
pub mod least_conn;
pub mod nodefile;
pub mod pool;
pub mod reconcile;
pub mod round_robin;
pub mod spawner;

use std::fmt::Debug;
use std::str::FromStr;
use std::sync::Arc;

pub use backend::{Backend, DialContext, OutstandingGuard};
pub use least_conn::LeastConnections;
pub use pool::{Pool, PoolError, ReconcileOutcome};
pub use round_robin::RoundRobin;

/// Strategy for choosing which backend to dial next.
pub trait LoadBalancer: Send + Sync + Debug {
    fn next_backend(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>>;
}

/// Balancing strategy names accepted by the pool's `balance` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Balance {
    #[default]
    RoundRobin,
    LeastConn,
}

impl Balance {
    pub fn build(self) -> Arc<dyn LoadBalancer> {
        match self {
            Balance::RoundRobin => Arc::new(RoundRobin::new()),
            Balance::LeastConn => Arc::new(LeastConnections::new()),
        }
    }
}

impl FromStr for Balance {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "round_robin" => Ok(Balance::RoundRobin),
            "least_conn" => Ok(Balance::LeastConn),
            other => Err(PoolError::UnknownBalance(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balance_names() {
        assert_eq!("round_robin".parse::<Balance>().unwrap(), Balance::RoundRobin);
        assert_eq!(" least_conn ".parse::<Balance>().unwrap(), Balance::LeastConn);
        assert!(matches!(
            "random".parse::<Balance>(),
            Err(PoolError::UnknownBalance(name)) if name == "random"
        ));
    }
}
