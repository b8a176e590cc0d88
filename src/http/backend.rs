//! Backend-side HTTP connections.
//!
//! # Responsibilities
//! - Dial a backend and run a hyper HTTP/1 client connection over it
//! - Rewrite a client request for the upstream hop
//! - Collect the backend response and decide whether the connection can be reused

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1::{self, SendRequest};
use hyper::header::{HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, HOST};
use hyper::{HeaderMap, Uri, Version};
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::response::strip_hop_by_hop;
use super::{ClientInfo, HttpError, Request, Response};
use crate::net::{Connection, ConnectionId};
use crate::pool::Backend;

const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// An established HTTP/1 connection to one backend.
///
/// Carries one request at a time. Dropping it tears the connection down.
pub struct BackendConnection {
    id: ConnectionId,
    backend: Arc<Backend>,
    sender: SendRequest<Full<Bytes>>,
    driver: JoinHandle<()>,
    reusable: bool,
}

impl std::fmt::Debug for BackendConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConnection")
            .field("id", &self.id)
            .field("backend", &self.backend.addr())
            .field("reusable", &self.reusable)
            .finish()
    }
}

impl BackendConnection {
    /// Dial `backend` within `timeout` and complete the HTTP/1 handshake.
    pub async fn open(backend: Arc<Backend>, timeout: Duration) -> Result<Self, HttpError> {
        let conn = Connection::dial(backend.addr(), timeout).await?;
        let id = conn.id();
        let stream = conn.into_stream()?;
        let _ = stream.set_nodelay(true);

        let (sender, connection) = http1::handshake(TokioIo::new(stream)).await?;
        let addr = backend.addr().to_string();
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(connection_id = %id, addr = %addr, error = %e, "Backend connection ended");
            }
        });

        Ok(Self {
            id,
            backend,
            sender,
            driver,
            reusable: true,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    /// True once the backend side has gone away.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed() || self.driver.is_finished()
    }

    /// False once an exchange failed or the backend asked to close.
    pub fn is_reusable(&self) -> bool {
        self.reusable
    }

    /// Wait until the connection can take another request.
    pub async fn ready(&mut self) -> Result<(), HttpError> {
        self.sender.ready().await.map_err(HttpError::from)
    }

    /// Proxy one request and collect the full response.
    ///
    /// The backend counts the request as outstanding until the response body
    /// has been read.
    pub async fn send(&mut self, request: Request, client: &ClientInfo) -> Result<Response, HttpError> {
        let _outstanding = self.backend.begin_request();
        let upstream = prepare(request, self.backend.addr(), client)?;

        let response = match self.sender.send_request(upstream).await {
            Ok(response) => response,
            Err(e) => {
                self.reusable = false;
                return Err(e.into());
            }
        };

        let (mut parts, body) = response.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                self.reusable = false;
                return Err(e.into());
            }
        };

        self.reusable = parts.version == Version::HTTP_11 && !asks_to_close(&parts.headers);
        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, body))
    }
}

impl Drop for BackendConnection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

fn asks_to_close(headers: &HeaderMap) -> bool {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("close"))
}

/// Rewrite a client request for the upstream hop.
fn prepare(request: Request, backend_addr: &str, client: &ClientInfo) -> Result<hyper::Request<Full<Bytes>>, HttpError> {
    let (mut parts, body) = request.into_parts();
    strip_hop_by_hop(&mut parts.headers);

    let uri: Uri = parts
        .uri
        .path_and_query()
        .map_or("/", |pq| pq.as_str())
        .parse()
        .map_err(|e: hyper::http::uri::InvalidUri| HttpError::Malformed(e.to_string()))?;
    parts.uri = uri;
    parts.version = Version::HTTP_11;

    let headers = &mut parts.headers;
    if !headers.contains_key(HOST) {
        let host = HeaderValue::from_str(backend_addr).map_err(|e| HttpError::Backend(e.to_string()))?;
        headers.insert(HOST, host);
    }
    if !headers.contains_key(&X_REQUEST_ID) {
        let id = HeaderValue::from_str(&Uuid::new_v4().to_string()).map_err(|e| HttpError::Backend(e.to_string()))?;
        headers.insert(X_REQUEST_ID, id);
    }
    if let Some(peer) = client.peer_addr {
        let ip = peer.ip().to_string();
        let forwarded = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(previous) => format!("{}, {}", previous, ip),
            None => ip,
        };
        let value = HeaderValue::from_str(&forwarded).map_err(|e| HttpError::Malformed(e.to_string()))?;
        headers.insert(X_FORWARDED_FOR, value);
    }
    headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));

    Ok(hyper::Request::from_parts(parts, Full::new(body)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::parse_head;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn client() -> ClientInfo {
        ClientInfo {
            connection_id: ConnectionId::new(),
            peer_addr: Some("192.0.2.7:50000".parse().unwrap()),
            listen_addr: "127.0.0.1:8080".to_string(),
        }
    }

    #[test]
    fn prepare_rewrites_for_upstream() {
        let mut request = parse_head(
            b"POST http://front.example/submit?x=1 HTTP/1.0\r\nConnection: keep-alive\r\nX-Forwarded-For: 10.1.1.1\r\n\r\n",
        )
        .unwrap();
        *request.body_mut() = Bytes::from_static(b"abc");

        let upstream = prepare(request, "10.0.0.5:9000", &client()).unwrap();
        assert_eq!(upstream.uri(), "/submit?x=1");
        assert_eq!(upstream.version(), Version::HTTP_11);
        assert_eq!(upstream.headers()[HOST], "10.0.0.5:9000");
        assert_eq!(upstream.headers()[&X_FORWARDED_FOR], "10.1.1.1, 192.0.2.7");
        assert_eq!(upstream.headers()[CONTENT_LENGTH], "3");
        assert!(upstream.headers().contains_key(&X_REQUEST_ID));
        assert!(!upstream.headers().contains_key(CONNECTION));
    }

    #[test]
    fn prepare_keeps_client_host_and_request_id() {
        let request = parse_head(b"GET / HTTP/1.1\r\nHost: site\r\nX-Request-Id: abc\r\n\r\n").unwrap();
        let upstream = prepare(request, "10.0.0.5:9000", &client()).unwrap();
        assert_eq!(upstream.headers()[HOST], "site");
        assert_eq!(upstream.headers()[&X_REQUEST_ID], "abc");
    }

    #[tokio::test]
    async fn round_trip_and_close_detection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut seen = Vec::new();
            while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                seen.extend_from_slice(&buf[..n]);
            }
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\nX-Backend: a\r\n\r\nhello")
                .await
                .unwrap();
        });

        let backend = Arc::new(Backend::new(addr, 1));
        let mut conn = BackendConnection::open(Arc::clone(&backend), Duration::from_secs(2))
            .await
            .unwrap();
        assert!(conn.is_reusable());

        let request = parse_head(b"GET /x HTTP/1.1\r\n\r\n").unwrap();
        let response = conn.send(request, &client()).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.body().as_ref(), b"hello");
        assert_eq!(response.headers()["x-backend"], "a");
        assert!(!response.headers().contains_key(CONNECTION));
        assert!(!conn.is_reusable());
        assert_eq!(backend.outstanding(), 0);
    }

    #[tokio::test]
    async fn open_reports_refused_dial() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let backend = Arc::new(Backend::new(addr, 1));
        let err = BackendConnection::open(backend, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, HttpError::Transport(_)));
    }
}
