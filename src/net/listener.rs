//! TCP listener with a pluggable acceptor.
//!
//! # Responsibilities
//! - Resolve and bind one configured address
//! - Accept incoming TCP connections on a dedicated task
//! - Hand each socket to the owner's [`Acceptor`]
//! - Stop cleanly when closed
//! - Hand a bound socket over to a fresh accept loop on rebind
//!
//! # Failure policy
//! - Bind/resolve errors surface immediately and are never retried
//! - An accept error ends the loop; the listener is dead afterwards
//! - A rejecting acceptor only costs that one socket

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The address string did not resolve to anything bindable.
    #[error("failed to resolve {addr}: {reason}")]
    Resolve { addr: String, reason: String },
    /// Failed to bind to address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// A socket the acceptor refused, returned so the listener can close it.
#[derive(Debug)]
pub struct Rejected {
    pub stream: TcpStream,
    pub reason: String,
}

impl Rejected {
    pub fn new(stream: TcpStream, reason: impl Into<String>) -> Self {
        Self {
            stream,
            reason: reason.into(),
        }
    }
}

/// Handler invoked synchronously for each accepted socket with the listen address.
pub type Acceptor = Arc<dyn Fn(TcpStream, &str) -> Result<(), Rejected> + Send + Sync>;

/// A bound address plus its accept loop.
///
/// Dropping the listener stops the loop as well. The socket itself is released
/// once the loop has exited and no successor holds it.
pub struct Listener {
    addr: String,
    local_addr: SocketAddr,
    socket: Arc<TcpListener>,
    alive: Arc<AtomicBool>,
    stop_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("addr", &self.addr)
            .field("local_addr", &self.local_addr)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl Listener {
    /// Bind `addr` and start accepting on a new task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(addr: &str, acceptor: Acceptor) -> Result<Self, ListenerError> {
        let resolved = Self::resolve(addr)?;

        let bind_err = |source| ListenerError::Bind {
            addr: addr.to_string(),
            source,
        };
        let std_listener = std::net::TcpListener::bind(resolved).map_err(bind_err)?;
        std_listener.set_nonblocking(true).map_err(bind_err)?;
        let listener = TcpListener::from_std(std_listener).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        tracing::info!(addr = %addr, local_addr = %local_addr, "Listener bound");
        Ok(Self::start(addr, local_addr, Arc::new(listener), acceptor))
    }

    /// Close `previous` and keep accepting on its socket with a new loop.
    ///
    /// The socket stays bound throughout, so rebinding the same address
    /// cannot race the old loop's shutdown.
    pub fn take_over(previous: Listener, addr: &str, acceptor: Acceptor) -> Self {
        previous.close();
        tracing::info!(addr = %addr, local_addr = %previous.local_addr, "Listener socket handed over");
        Self::start(addr, previous.local_addr, Arc::clone(&previous.socket), acceptor)
    }

    /// First socket address `addr` resolves to.
    pub fn resolve(addr: &str) -> Result<SocketAddr, ListenerError> {
        addr.to_socket_addrs()
            .map_err(|e| ListenerError::Resolve {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?
            .next()
            .ok_or_else(|| ListenerError::Resolve {
                addr: addr.to_string(),
                reason: "no addresses".to_string(),
            })
    }

    fn start(addr: &str, local_addr: SocketAddr, socket: Arc<TcpListener>, acceptor: Acceptor) -> Self {
        let alive = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(accept_loop(
            Arc::clone(&socket),
            addr.to_string(),
            acceptor,
            Arc::clone(&alive),
            stop_rx,
        ));

        Self {
            addr: addr.to_string(),
            local_addr,
            socket,
            alive,
            stop_tx,
        }
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// False once closed or once the accept loop has died.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Mark the listener dead and release the bound socket.
    pub fn close(&self) {
        tracing::debug!(addr = %self.addr, "Closing listener");
        self.alive.store(false, Ordering::SeqCst);
        let _ = self.stop_tx.send(true);
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
    }
}

async fn accept_loop(
    listener: Arc<TcpListener>,
    addr: String,
    acceptor: Acceptor,
    alive: Arc<AtomicBool>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                tracing::debug!(addr = %addr, "Accept loop stopped");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    tracing::debug!(addr = %addr, peer_addr = %peer_addr, "Connection accepted");
                    if let Err(rejected) = acceptor(stream, &addr) {
                        drop(rejected.stream);
                        tracing::error!(
                            addr = %addr,
                            peer_addr = %peer_addr,
                            reason = %rejected.reason,
                            "Acceptor rejected connection"
                        );
                    }
                }
                Err(e) => {
                    tracing::error!(addr = %addr, error = %e, "Accept failed, listener is dead");
                    break;
                }
            }
        }
    }
    alive.store(false, Ordering::SeqCst);
}
