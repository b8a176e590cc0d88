//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use switchyard::config::RuntimeConfig;
use switchyard::control::{Configurable, Registry};
use switchyard::pool::Pool;

/// Read one request head off `socket`. Returns `None` at EOF.
pub async fn read_head(socket: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    while !buf.ends_with(b"\r\n\r\n") {
        match socket.read(&mut byte).await {
            Ok(0) | Err(_) => return None,
            Ok(_) => buf.push(byte[0]),
        }
    }
    Some(String::from_utf8_lossy(&buf).into_owned())
}

/// Start a backend on an ephemeral port. `f` gets each request head and
/// returns the status line suffix and body.
///
/// With `keep_alive` the backend serves many requests per connection,
/// otherwise it answers once with `Connection: close`.
pub async fn start_backend<F, Fut>(keep_alive: bool, f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (&'static str, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = Arc::clone(&f);
            tokio::spawn(async move {
                while let Some(head) = read_head(&mut socket).await {
                    let (status, body) = f(head).await;
                    let connection = if keep_alive { "keep-alive" } else { "close" };
                    let response = format!(
                        "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: {}\r\n\r\n{}",
                        status,
                        body.len(),
                        connection,
                        body
                    );
                    if socket.write_all(response.as_bytes()).await.is_err() || !keep_alive {
                        break;
                    }
                }
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// A backend answering every request with `200 OK` and `body`.
pub async fn start_fixed_backend(body: &'static str) -> SocketAddr {
    start_backend(true, move |_| async move { ("200 OK", body.to_string()) }).await
}

/// Write a node file listing `addrs`.
pub fn write_node_file(path: &Path, addrs: &[SocketAddr]) {
    let mut text = String::from("# backends\n");
    for addr in addrs {
        text.push_str(&format!("{}\n", addr));
    }
    std::fs::write(path, text).unwrap();
}

/// Runtime settings with short waits so failures show up quickly.
pub fn fast_settings() -> RuntimeConfig {
    RuntimeConfig {
        connect_timeout_ms: 500,
        backend_wait_ms: 1000,
        reconcile_interval_secs: 1,
        ..RuntimeConfig::default()
    }
}

/// Create and enable a pool reading `node_file`, then wait for its first pass.
pub async fn ready_pool(registry: &Registry, name: &str, node_file: &Path) -> Arc<Pool> {
    let pool = registry.create_pool(name).unwrap();
    pool.set("nodefile", &node_file.display().to_string()).unwrap();
    pool.enable().unwrap();
    wait_for(|| pool.generation() > 0).await;
    pool
}

/// Poll `cond` until it holds, panicking after five seconds.
pub async fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// HTTP client that never goes through an environment proxy.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}
