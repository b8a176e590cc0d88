//! HTTP protocol pump.
//!
//! One task per accepted client connection: read a request, hand it to the
//! service, wait for the matching response, write it, repeat.

use hyper::{Method, StatusCode};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tracing::Instrument;

use super::{error_response, read_request, wants_keep_alive, write_response, ClientInfo, HttpError};
use crate::net::Connection;
use crate::observability::metrics;
use crate::service::Service;

/// Wrap `stream` and start its pump task.
pub fn spawn(stream: TcpStream, service: Arc<Service>, listen_addr: &str) {
    let conn = Connection::wrap(stream);
    let span = tracing::debug_span!(
        "http_connection",
        service = %service.name(),
        connection_id = %conn.id(),
        peer_addr = ?conn.peer_addr(),
    );
    tokio::spawn(pump(conn, service, listen_addr.to_string()).instrument(span));
}

async fn pump(mut conn: Connection, service: Arc<Service>, listen_addr: String) {
    let _tracked = service.tracker().track(conn.id());
    let client = ClientInfo {
        connection_id: conn.id(),
        peer_addr: conn.peer_addr(),
        listen_addr,
    };
    let max_body = service.settings().max_body_bytes;

    loop {
        let request = match read_request(&mut conn, max_body).await {
            Ok(request) => request,
            Err(HttpError::ConnectionClosed) => {
                tracing::trace!("Client closed connection");
                break;
            }
            Err(e) => {
                tracing::debug!(error = %e, "Failed to read request");
                if let Some(status) = e.client_status() {
                    let _ = write_response(&mut conn, &error_response(status, &e), &Method::GET, true).await;
                }
                break;
            }
        };

        let started = Instant::now();
        let keep_alive = wants_keep_alive(&request);
        let method = request.method().clone();
        tracing::debug!(method = %request.method(), path = %request.uri().path(), "Request received");

        let (tx, rx) = oneshot::channel();
        if let Err(e) = service.handle_request(client.clone(), request, tx).await {
            tracing::error!(error = %e, "Service refused request");
            let response = error_response(StatusCode::SERVICE_UNAVAILABLE, &e);
            metrics::record_request(service.name(), response.status().as_u16(), started);
            let _ = write_response(&mut conn, &response, &method, true).await;
            break;
        }

        // The dispatch loop guarantees one response; a dropped sender is a bug
        // upstream but the client still gets an answer.
        let response = match rx.await {
            Ok(response) => response,
            Err(_) => {
                tracing::error!("Request dropped without a response");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, &"request dropped without a response")
            }
        };
        metrics::record_request(service.name(), response.status().as_u16(), started);

        if let Err(e) = write_response(&mut conn, &response, &method, !keep_alive).await {
            tracing::debug!(error = %e, "Failed to write response");
            break;
        }
        if !keep_alive {
            break;
        }
    }

    if let Err(e) = conn.close().await {
        tracing::trace!(error = %e, "Close after pump exit");
    }
}
