//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, one per bound address)
//!     → Acceptor chosen by the owning service
//!     → connection.rs (buffered stream, owned by one pump task)
//!     → Hand off to HTTP / management layer
//!
//! Outgoing backend connection
//!     → connection.rs Connection::dial (bounded by connect timeout)
//!     → Hand off to http::backend
//! ```
//!
//! # Design Decisions
//! - A listener never restarts itself after an accept error
//! - Connection close is idempotent; the socket is released once
//! - Binding is synchronous so control-plane calls stay synchronous

pub mod connection;
pub mod listener;

pub use connection::{Connection, ConnectionError, ConnectionId, ConnectionTracker};
pub use listener::{Acceptor, Listener, ListenerError, Rejected};
