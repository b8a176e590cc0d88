//! Control surface.
//!
//! # Data Flow
//! ```text
//! config/apply.rs (or a test)
//!     → Registry::create_pool / create_service
//!     → Component::set(key, value) ... Component::enable()
//!     → Pool / Service (both implement Configurable)
//! ```
//!
//! # Design Decisions
//! - The registry is an owned handle, never ambient global state
//! - Names are unique per kind; a service and a pool may share one
//! - Entries live as long as the registry

pub mod registry;

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::pool::{Pool, PoolError};
use crate::service::{Service, ServiceError};

pub use registry::Registry;

/// Which registry a component lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Service,
    Pool,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentKind::Service => write!(f, "service"),
            ComponentKind::Pool => write!(f, "pool"),
        }
    }
}

/// Errors surfaced to whoever drives the control interface.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("{kind} {name:?} not found")]
    NotFound { kind: ComponentKind, name: String },
}

/// The create/set/enable capability shared by services and pools.
pub trait Configurable {
    fn name(&self) -> &str;

    fn kind(&self) -> ComponentKind;

    /// Apply one setting. Unknown keys are logged and ignored.
    fn set(&self, key: &str, value: &str) -> Result<(), ControlError>;

    /// Activate the component. Safe to call more than once.
    fn enable(&self) -> Result<(), ControlError>;
}

/// A registered service or pool.
#[derive(Debug, Clone)]
pub enum Component {
    Service(Arc<Service>),
    Pool(Arc<Pool>),
}

impl Component {
    fn inner(&self) -> &dyn Configurable {
        match self {
            Component::Service(service) => service.as_ref(),
            Component::Pool(pool) => pool.as_ref(),
        }
    }
}

impl Configurable for Component {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn kind(&self) -> ComponentKind {
        self.inner().kind()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ControlError> {
        self.inner().set(key, value)
    }

    fn enable(&self) -> Result<(), ControlError> {
        self.inner().enable()
    }
}
