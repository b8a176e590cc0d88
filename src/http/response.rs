//! Response construction and serialization.
//!
//! # Responsibilities
//! - Build the plain responses the proxy produces itself
//! - Strip hop-by-hop headers from relayed responses
//! - Serialize a response onto a client connection

use bytes::Bytes;
use hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{HeaderMap, Method, StatusCode};
use std::fmt::Display;

use super::{HttpError, Response};
use crate::net::Connection;

/// Headers that describe a single transport hop and are never relayed.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// A plain-text response with the given status and body.
pub fn simple_response(status: StatusCode, body: impl Into<Bytes>) -> Response {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

/// An error response whose body carries the failure description.
pub fn error_response(status: StatusCode, err: &dyn Display) -> Response {
    simple_response(status, format!("Failure: {}", err))
}

/// Remove hop-by-hop headers in place.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Serialize `response` to the client.
///
/// The body length is always sent as `Content-Length`, except that an answer
/// to `HEAD` keeps the length it was given and carries no body. When `close`
/// is set the client is told the connection ends after this response.
pub async fn write_response(
    conn: &mut Connection,
    response: &Response,
    method: &Method,
    close: bool,
) -> Result<(), HttpError> {
    let head_only = *method == Method::HEAD;
    let status = response.status();
    let mut head = Vec::with_capacity(256);
    head.extend_from_slice(
        format!(
            "HTTP/1.1 {} {}\r\n",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown")
        )
        .as_bytes(),
    );

    for (name, value) in response.headers() {
        if *name == CONTENT_LENGTH || HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        head.extend_from_slice(name.as_str().as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    let declared = response.headers().get(CONTENT_LENGTH).filter(|_| head_only);
    match declared {
        Some(length) => {
            head.extend_from_slice(b"content-length: ");
            head.extend_from_slice(length.as_bytes());
            head.extend_from_slice(b"\r\n");
        }
        None => head.extend_from_slice(format!("content-length: {}\r\n", response.body().len()).as_bytes()),
    }
    if close {
        head.extend_from_slice(b"connection: close\r\n");
    }
    head.extend_from_slice(b"\r\n");

    conn.write_all(&head).await?;
    if !head_only {
        conn.write_all(response.body()).await?;
    }
    conn.flush().await?;
    Ok(())
}
