//! Reading requests off a client connection.
//!
//! # Responsibilities
//! - Read the request head line by line and parse it with httparse
//! - Read `Content-Length` and chunked bodies, bounded by a size limit
//! - Decide whether the client wants the connection kept open

use bytes::Bytes;
use hyper::header::{CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING};
use hyper::{HeaderMap, Version};

use super::{HttpError, Request};
use crate::net::{Connection, ConnectionError};

/// Maximum number of headers to parse.
const MAX_HEADERS: usize = 100;

/// Upper bound on the request line plus headers.
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Upper bound on a chunk-size line, extensions included.
const MAX_CHUNK_LINE_BYTES: usize = 4 * 1024;

fn is_blank(line: &[u8]) -> bool {
    line == b"\r\n" || line == b"\n"
}

/// Read one complete request from `conn`.
///
/// Returns [`HttpError::ConnectionClosed`] when the peer hangs up cleanly
/// before sending anything.
pub async fn read_request(conn: &mut Connection, max_body: usize) -> Result<Request, HttpError> {
    let mut head = Vec::with_capacity(1024);

    // Stray CRLFs between requests are allowed.
    loop {
        if read_head_line(conn, &mut head).await? == 0 {
            return Err(HttpError::ConnectionClosed);
        }
        if !is_blank(&head) {
            break;
        }
        head.clear();
    }

    loop {
        let start = head.len();
        if read_head_line(conn, &mut head).await? == 0 {
            return Err(HttpError::Malformed("connection closed mid-request".to_string()));
        }
        if is_blank(&head[start..]) {
            break;
        }
    }

    let mut request = parse_head(&head)?;
    let body = read_body(conn, request.headers(), max_body).await?;
    *request.body_mut() = body;
    Ok(request)
}

/// Append one head line, keeping the whole head within [`MAX_HEAD_BYTES`].
async fn read_head_line(conn: &mut Connection, head: &mut Vec<u8>) -> Result<usize, HttpError> {
    let too_long = || HttpError::Malformed(format!("request head exceeds {} bytes", MAX_HEAD_BYTES));
    let remaining = MAX_HEAD_BYTES.saturating_sub(head.len());
    if remaining == 0 {
        return Err(too_long());
    }
    match conn.read_line_bytes(head, remaining).await {
        Ok(n) => Ok(n),
        Err(ConnectionError::LineTooLong { .. }) => Err(too_long()),
        Err(e) => Err(e.into()),
    }
}

/// Read a line inside a chunked body. Over-long lines are malformed.
async fn read_body_line(conn: &mut Connection, line: &mut Vec<u8>) -> Result<usize, HttpError> {
    match conn.read_line_bytes(line, MAX_CHUNK_LINE_BYTES).await {
        Ok(n) => Ok(n),
        Err(ConnectionError::LineTooLong { limit }) => Err(HttpError::Malformed(format!(
            "chunked body line exceeds {} bytes",
            limit
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Parse a complete request head (request line + headers + blank line).
pub fn parse_head(head: &[u8]) -> Result<Request, HttpError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut headers);

    match parsed.parse(head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(HttpError::Malformed("incomplete request head".to_string()))
        }
        Err(e) => return Err(HttpError::Malformed(e.to_string())),
    }

    let version = match parsed.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };

    let mut builder = hyper::Request::builder()
        .method(parsed.method.unwrap_or("GET"))
        .uri(parsed.path.unwrap_or("/"))
        .version(version);
    for header in parsed.headers.iter() {
        builder = builder.header(header.name, header.value);
    }

    builder
        .body(Bytes::new())
        .map_err(|e| HttpError::Malformed(e.to_string()))
}

fn is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .last()
        .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
}

async fn read_body(conn: &mut Connection, headers: &HeaderMap, max: usize) -> Result<Bytes, HttpError> {
    if is_chunked(headers) {
        return read_chunked(conn, max).await;
    }

    let Some(value) = headers.get(CONTENT_LENGTH) else {
        return Ok(Bytes::new());
    };
    let size: usize = value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| HttpError::Malformed("invalid content-length".to_string()))?;
    if size > max {
        return Err(HttpError::BodyTooLarge { size, max });
    }

    let mut body = vec![0u8; size];
    conn.read_exact(&mut body).await.map_err(|e| match HttpError::from(e) {
        HttpError::ConnectionClosed => HttpError::Malformed("body shorter than content-length".to_string()),
        other => other,
    })?;
    Ok(Bytes::from(body))
}

async fn read_chunked(conn: &mut Connection, max: usize) -> Result<Bytes, HttpError> {
    let truncated = || HttpError::Malformed("connection closed inside chunked body".to_string());
    let mut body = Vec::new();

    loop {
        let mut line = Vec::new();
        if read_body_line(conn, &mut line).await? == 0 {
            return Err(truncated());
        }
        let text = std::str::from_utf8(&line)
            .map_err(|_| HttpError::Malformed("chunk size is not ASCII".to_string()))?;
        let size_field = text.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_field, 16)
            .map_err(|_| HttpError::Malformed(format!("invalid chunk size {:?}", size_field)))?;

        if size == 0 {
            // Discard trailers up to the terminating blank line. They share
            // the head's size budget.
            let mut trailers = Vec::new();
            loop {
                let start = trailers.len();
                let n = read_head_line(conn, &mut trailers).await?;
                if n == 0 || is_blank(&trailers[start..]) {
                    break;
                }
            }
            return Ok(Bytes::from(body));
        }

        if size > max.saturating_sub(body.len()) {
            return Err(HttpError::BodyTooLarge {
                size: body.len().saturating_add(size),
                max,
            });
        }
        let total = body.len() + size;
        let start = body.len();
        body.resize(total, 0);
        conn.read_exact(&mut body[start..]).await.map_err(|_| truncated())?;

        let mut crlf = Vec::new();
        read_body_line(conn, &mut crlf).await?;
        if !is_blank(&crlf) {
            return Err(HttpError::Malformed("chunk not terminated by CRLF".to_string()));
        }
    }
}

/// Whether the client expects the connection to stay open after this request.
pub fn wants_keep_alive(request: &Request) -> bool {
    let tokens: Vec<String> = request
        .headers()
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .collect();

    match request.version() {
        Version::HTTP_10 => tokens.iter().any(|t| t == "keep-alive"),
        _ => !tokens.iter().any(|t| t == "close"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};

    async fn feed(raw: &'static [u8]) -> Connection {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, server) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let mut client = client.unwrap();
        client.write_all(raw).await.unwrap();
        client.shutdown().await.unwrap();
        Connection::wrap(server.unwrap().0)
    }

    #[test]
    fn parse_head_reads_method_path_headers() {
        let req = parse_head(b"GET /index.html?x=1 HTTP/1.1\r\nHost: example\r\n\r\n").unwrap();
        assert_eq!(req.method(), hyper::Method::GET);
        assert_eq!(req.uri().path(), "/index.html");
        assert_eq!(req.uri().query(), Some("x=1"));
        assert_eq!(req.headers()["host"], "example");
    }

    #[test]
    fn parse_head_rejects_garbage() {
        assert!(matches!(parse_head(b"\x00\x01 nonsense\r\n\r\n"), Err(HttpError::Malformed(_))));
    }

    #[tokio::test]
    async fn reads_two_requests_in_sequence() {
        let mut conn = feed(
            b"POST /a HTTP/1.1\r\nContent-Length: 5\r\n\r\nhelloGET /b HTTP/1.1\r\n\r\n",
        )
        .await;

        let first = read_request(&mut conn, 1024).await.unwrap();
        assert_eq!(first.uri().path(), "/a");
        assert_eq!(first.body().as_ref(), b"hello");

        let second = read_request(&mut conn, 1024).await.unwrap();
        assert_eq!(second.uri().path(), "/b");
        assert!(second.body().is_empty());

        assert!(matches!(read_request(&mut conn, 1024).await, Err(HttpError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn decodes_chunked_body() {
        let mut conn = feed(
            b"POST /up HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6;ext=1\r\n world\r\n0\r\nX-Trailer: y\r\n\r\n",
        )
        .await;
        let req = read_request(&mut conn, 1024).await.unwrap();
        assert_eq!(req.body().as_ref(), b"hello world");
    }

    #[tokio::test]
    async fn body_over_limit_is_rejected() {
        let mut conn = feed(b"POST / HTTP/1.1\r\nContent-Length: 100\r\n\r\n").await;
        let err = read_request(&mut conn, 10).await.unwrap_err();
        assert!(matches!(err, HttpError::BodyTooLarge { size: 100, max: 10 }));
    }

    #[tokio::test]
    async fn truncated_head_is_malformed() {
        let mut conn = feed(b"GET / HTTP/1.1\r\nHost: x\r\n").await;
        assert!(matches!(read_request(&mut conn, 10).await, Err(HttpError::Malformed(_))));
    }

    #[tokio::test]
    async fn huge_chunk_size_is_too_large() {
        let mut conn = feed(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n1\r\na\r\nffffffffffffffff\r\n").await;
        let err = read_request(&mut conn, 1024).await.unwrap_err();
        assert!(matches!(err, HttpError::BodyTooLarge { size: usize::MAX, max: 1024 }));
    }

    #[tokio::test]
    async fn chunks_past_limit_are_rejected() {
        let mut conn = feed(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nabcd\r\n8\r\n").await;
        let err = read_request(&mut conn, 10).await.unwrap_err();
        assert!(matches!(err, HttpError::BodyTooLarge { size: 12, max: 10 }));
    }

    async fn feed_owned(raw: Vec<u8>) -> Connection {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, server) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let mut client = client.unwrap();
        tokio::spawn(async move {
            let _ = client.write_all(&raw).await;
            let _ = client.shutdown().await;
        });
        Connection::wrap(server.unwrap().0)
    }

    #[tokio::test]
    async fn endless_request_line_is_malformed() {
        let mut raw = b"GET /".to_vec();
        raw.extend(std::iter::repeat(b'a').take(4 * 1024 * 1024));
        let mut conn = feed_owned(raw).await;

        let err = read_request(&mut conn, 1024).await.unwrap_err();
        let HttpError::Malformed(reason) = err else {
            panic!("expected malformed, got {err}");
        };
        assert!(reason.contains("request head exceeds"));
    }

    #[tokio::test]
    async fn headers_past_head_limit_are_malformed() {
        let mut raw = b"GET / HTTP/1.1\r\n".to_vec();
        for i in 0..2_000 {
            raw.extend(format!("X-Filler-{i}: {}\r\n", "v".repeat(40)).into_bytes());
        }
        raw.extend(b"\r\n");
        let mut conn = feed_owned(raw).await;
        assert!(matches!(read_request(&mut conn, 1024).await, Err(HttpError::Malformed(_))));
    }

    #[tokio::test]
    async fn endless_chunk_size_line_is_malformed() {
        let mut raw = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
        raw.extend(std::iter::repeat(b'0').take(64 * 1024));
        let mut conn = feed_owned(raw).await;
        assert!(matches!(read_request(&mut conn, 1024).await, Err(HttpError::Malformed(_))));
    }

    #[test]
    fn keep_alive_defaults_follow_version() {
        let v11 = parse_head(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert!(wants_keep_alive(&v11));

        let v11_close = parse_head(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
        assert!(!wants_keep_alive(&v11_close));

        let v10 = parse_head(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert!(!wants_keep_alive(&v10));

        let v10_ka = parse_head(b"GET / HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n").unwrap();
        assert!(wants_keep_alive(&v10_ka));
    }
}
