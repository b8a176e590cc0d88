//! Static file serving for the web-server role.

use bytes::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::StatusCode;
use std::path::{Component, Path, PathBuf};

use super::ServiceError;
use crate::http::{error_response, simple_response, Request, Response};

/// Served in place of a directory.
const INDEX_FILE: &str = "index.html";

/// Resolve `uri_path` under `root` without touching the filesystem.
///
/// `..` segments are applied lexically; one that would climb above `root`
/// fails with [`ServiceError::PathEscape`].
pub fn clean_path(root: &Path, uri_path: &str) -> Result<PathBuf, ServiceError> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in uri_path.trim().split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(ServiceError::PathEscape);
                }
            }
            other => segments.push(other),
        }
    }

    let mut path = root.to_path_buf();
    for segment in segments {
        // A segment holding a separator or drive prefix could still jump out.
        let mut parts = Path::new(segment).components();
        match (parts.next(), parts.next()) {
            (Some(Component::Normal(part)), None) => path.push(part),
            _ => return Err(ServiceError::PathEscape),
        }
    }
    Ok(path)
}

/// Find the file to serve, substituting the index document for directories.
pub async fn resolve_file(root: &Path, uri_path: &str) -> Result<PathBuf, String> {
    let path = clean_path(root, uri_path).map_err(|e| e.to_string())?;
    let meta = tokio::fs::metadata(&path)
        .await
        .map_err(|e| format!("stat {}: {}", uri_path, e))?;
    if meta.is_dir() {
        Ok(path.join(INDEX_FILE))
    } else {
        Ok(path)
    }
}

/// Serve one request from `docroot`.
///
/// Any failure becomes a 500 response whose body describes it.
pub async fn serve(docroot: Option<&Path>, request: &Request) -> Response {
    let Some(root) = docroot else {
        tracing::error!("Web server has no docroot");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, &"docroot is not set");
    };
    let uri_path = request.uri().path();

    let path = match resolve_file(root, uri_path).await {
        Ok(path) => path,
        Err(e) => {
            tracing::debug!(path = %uri_path, error = %e, "File lookup failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e);
        }
    };

    match tokio::fs::read(&path).await {
        Ok(contents) => {
            let mut response = simple_response(StatusCode::OK, Bytes::from(contents));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(content_type(&path)));
            response
        }
        Err(e) => {
            tracing::debug!(path = %uri_path, error = %e, "File read failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &format!("open {}: {}", uri_path, e))
        }
    }
}

fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}
