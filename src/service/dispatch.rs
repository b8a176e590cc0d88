//! Per-service dispatch loop.

use hyper::StatusCode;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;

use super::{files, Service, ServiceRole};
use crate::http::{error_response, ClientInfo, Request, Response};
use crate::lifecycle::Shutdown;
use crate::net::ConnectionId;
use crate::pool::Pool;

/// The single-use slot a response goes into.
#[derive(Debug)]
pub struct Responder {
    connection_id: ConnectionId,
    tx: oneshot::Sender<Response>,
}

impl Responder {
    /// Deliver the response. Consumes the slot, so it happens once.
    pub fn respond(self, response: Response) {
        if self.tx.send(response).is_err() {
            tracing::debug!(connection_id = %self.connection_id, "Client went away before the response");
        }
    }
}

/// One queued request and the slot its response goes into.
#[derive(Debug)]
pub struct ServiceRequest {
    pub client: ClientInfo,
    pub request: Request,
    pub responder: Responder,
}

impl ServiceRequest {
    pub fn new(client: ClientInfo, request: Request, tx: oneshot::Sender<Response>) -> Self {
        let responder = Responder {
            connection_id: client.connection_id,
            tx,
        };
        Self {
            client,
            request,
            responder,
        }
    }

    pub fn respond(self, response: Response) {
        self.responder.respond(response);
    }

    fn fail(self, status: StatusCode, err: &dyn std::fmt::Display) {
        self.respond(error_response(status, err));
    }
}

/// Pull requests off the queue until shutdown or until the service is gone.
pub async fn run(service: Weak<Service>, mut queue: mpsc::Receiver<ServiceRequest>, shutdown: Shutdown) {
    let mut stop = shutdown.subscribe();
    if shutdown.is_triggered() {
        return;
    }

    loop {
        let req = tokio::select! {
            received = queue.recv() => match received {
                Some(req) => req,
                None => break,
            },
            _ = stop.recv() => break,
        };

        let Some(service) = service.upgrade() else {
            req.fail(StatusCode::SERVICE_UNAVAILABLE, &"service is gone");
            break;
        };
        dispatch(&service, req).await;
    }

    tracing::debug!("Dispatch loop stopped");
}

async fn dispatch(service: &Arc<Service>, req: ServiceRequest) {
    match service.role() {
        ServiceRole::WebServer => {
            let docroot = service.docroot();
            let span = tracing::debug_span!("serve_file", service = %service.name());
            tokio::spawn(
                async move {
                    let response = files::serve(docroot.as_deref(), &req.request).await;
                    req.respond(response);
                }
                .instrument(span),
            );
        }
        ServiceRole::ReverseProxy => match service.pool() {
            Some(pool) => proxy(service, pool, req).await,
            None => {
                tracing::error!(service = %service.name(), "Reverse proxy has no pool");
                req.fail(StatusCode::SERVICE_UNAVAILABLE, &"no pool configured");
            }
        },
        ServiceRole::Management => {
            tracing::error!(service = %service.name(), "Request reached dispatch for a management service");
            req.fail(StatusCode::INTERNAL_SERVER_ERROR, &"invalid service type");
        }
    }
}

/// Obtain a backend connection (this may wait), then run the exchange on its
/// own task so the loop can take the next request.
async fn proxy(service: &Arc<Service>, pool: Arc<Pool>, req: ServiceRequest) {
    let mut conn = match pool.get_backend().await {
        Ok(conn) => conn,
        Err(e) => {
            tracing::warn!(service = %service.name(), pool = %pool.name(), error = %e, "No backend for request");
            req.fail(StatusCode::SERVICE_UNAVAILABLE, &e);
            return;
        }
    };

    let span = tracing::debug_span!(
        "proxy",
        service = %service.name(),
        backend = %conn.backend().addr(),
        connection_id = %req.client.connection_id,
    );
    tokio::spawn(
        async move {
            let ServiceRequest {
                client,
                request,
                responder,
            } = req;
            let response = match conn.send(request, &client).await {
                Ok(response) => {
                    tracing::debug!(status = %response.status(), "Backend responded");
                    response
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Backend exchange failed");
                    error_response(StatusCode::BAD_GATEWAY, &e)
                }
            };
            pool.release(conn);
            responder.respond(response);
        }
        .instrument(span),
    );
}
