//! switchyard: a multi-role network service host.
//!
//! Named services listen on TCP addresses and act as a static web server, a
//! reverse proxy in front of a pool of backends, or a line-oriented
//! management channel. Pools track their backends through a node file and
//! keep reusable upstream connections ready.

pub mod config;
pub mod control;
pub mod http;
pub mod lifecycle;
pub mod management;
pub mod net;
pub mod observability;
pub mod pool;
pub mod service;
pub mod session;

pub use config::schema::ProxyConfig;
pub use control::{Configurable, ControlError, Registry};
pub use lifecycle::Shutdown;
pub use pool::Pool;
pub use service::{Service, ServiceRole};
