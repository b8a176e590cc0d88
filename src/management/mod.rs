//! Management role: a line-oriented command channel.
//!
//! Every received line is logged, parsed as a [`Command`] and answered with a
//! single reply line. `quit` or EOF ends the session.

pub mod commands;

use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::Instrument;

use crate::net::{Connection, ConnectionError};
use crate::service::Service;

pub use commands::{execute, Command};

/// Wrap `stream` and start its line pump.
pub fn spawn(stream: TcpStream, service: Arc<Service>, listen_addr: &str) {
    let conn = Connection::wrap(stream);
    let span = tracing::debug_span!(
        "management",
        service = %service.name(),
        connection_id = %conn.id(),
        listen_addr = %listen_addr,
    );
    tokio::spawn(pump(conn, service).instrument(span));
}

async fn pump(mut conn: Connection, service: Arc<Service>) {
    let _tracked = service.tracker().track(conn.id());

    loop {
        let line = match conn.read_line().await {
            Ok(line) => line,
            Err(ConnectionError::Eof) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Management read failed");
                break;
            }
        };
        let line = line.trim_end();
        tracing::debug!(line = %line, "Received");

        let command = Command::parse(line);
        let reply = match service.registry() {
            Some(registry) => execute(&registry, &command),
            None => "ERR registry is gone".to_string(),
        };

        if let Err(e) = conn.write_line(&reply).await {
            tracing::debug!(error = %e, "Management write failed");
            break;
        }
        if let Err(e) = conn.flush().await {
            tracing::debug!(error = %e, "Management flush failed");
            break;
        }
        if command == Command::Quit {
            break;
        }
    }

    if let Err(e) = conn.close().await {
        tracing::trace!(error = %e, "Close after management session");
    }
}
