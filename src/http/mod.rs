//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted socket
//!     → acceptor.rs (one pump task per client connection)
//!     → request.rs (read one request off the buffered stream)
//!     → Service::handle_request with a one-shot response slot
//!     → [dispatch loop: file serving or backend.rs proxying]
//!     → response.rs (serialize response back to the client)
//! ```
//!
//! # Design Decisions
//! - One request in flight per client connection; no pipelining
//! - Client side is framed by hand over `net::Connection`
//! - Backend side uses hyper's HTTP/1 client connections
//! - Bodies are buffered in full (`Bytes`)

pub mod acceptor;
pub mod backend;
pub mod request;
pub mod response;

use std::net::SocketAddr;
use thiserror::Error;

use crate::net::{ConnectionError, ConnectionId};

pub use backend::BackendConnection;
pub use request::{read_request, wants_keep_alive};
pub use response::{error_response, simple_response, write_response};

/// A fully buffered HTTP request.
pub type Request = hyper::Request<bytes::Bytes>;
/// A fully buffered HTTP response.
pub type Response = hyper::Response<bytes::Bytes>;

/// Errors in HTTP framing and proxying.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The request could not be parsed.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// The peer went away between requests.
    #[error("connection closed")]
    ConnectionClosed,

    /// Body exceeded the configured limit.
    #[error("request body too large: {size} bytes (max: {max})")]
    BodyTooLarge { size: usize, max: usize },

    /// Transport failure on the underlying connection.
    #[error("transport error: {0}")]
    Transport(ConnectionError),

    /// The backend exchange failed.
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<ConnectionError> for HttpError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::Eof => HttpError::ConnectionClosed,
            other => HttpError::Transport(other),
        }
    }
}

impl From<hyper::Error> for HttpError {
    fn from(err: hyper::Error) -> Self {
        HttpError::Backend(err.to_string())
    }
}

impl HttpError {
    /// Status worth reporting to the client before hanging up, if any.
    pub fn client_status(&self) -> Option<hyper::StatusCode> {
        match self {
            HttpError::Malformed(_) => Some(hyper::StatusCode::BAD_REQUEST),
            HttpError::BodyTooLarge { .. } => Some(hyper::StatusCode::PAYLOAD_TOO_LARGE),
            _ => None,
        }
    }
}

/// Where a request came from. Travels with the request in place of the
/// connection itself, which stays owned by its pump task.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub connection_id: ConnectionId,
    pub peer_addr: Option<SocketAddr>,
    pub listen_addr: String,
}
