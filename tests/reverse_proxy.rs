//! End-to-end reverse proxy tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use switchyard::control::{Configurable, Registry};

mod common;

async fn proxy_service(registry: &Registry, pool: &str) -> std::net::SocketAddr {
    let svc = registry.create_service("front").unwrap();
    svc.set("role", "reverse_proxy").unwrap();
    svc.set("pool", pool).unwrap();
    svc.set("listen", "127.0.0.1:0").unwrap();
    svc.enable().unwrap();
    svc.local_addrs()[0]
}

#[tokio::test]
async fn test_proxies_to_backend() {
    let backend = common::start_backend(true, |head| async move {
        let id = head
            .lines()
            .find_map(|l| l.strip_prefix("x-request-id: "))
            .unwrap_or("missing")
            .to_string();
        ("200 OK", format!("request {}", id))
    })
    .await;

    let dir = tempfile::tempdir().unwrap();
    let node_file = dir.path().join("nodes");
    common::write_node_file(&node_file, &[backend]);

    let registry = Registry::new(common::fast_settings());
    common::ready_pool(&registry, "web", &node_file).await;
    let addr = proxy_service(&registry, "web").await;

    let resp = common::client()
        .get(format!("http://{}/hello", addr))
        .header("x-request-id", "abc-123")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "request abc-123");

    registry.shutdown();
}

#[tokio::test]
async fn test_keep_alive_client_connection() {
    let hits = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&hits);
    let backend = common::start_backend(true, move |_| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move { ("200 OK", format!("hit {}", n)) }
    })
    .await;

    let dir = tempfile::tempdir().unwrap();
    let node_file = dir.path().join("nodes");
    common::write_node_file(&node_file, &[backend]);

    let registry = Registry::new(common::fast_settings());
    common::ready_pool(&registry, "web", &node_file).await;
    let addr = proxy_service(&registry, "web").await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    for expected in ["hit 0", "hit 1"] {
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: test\r\n\r\n")
            .await
            .unwrap();
        let mut buf = vec![0u8; 1024];
        let mut received = String::new();
        while !received.ends_with(expected) {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed early: {received:?}");
            received.push_str(&String::from_utf8_lossy(&buf[..n]));
        }
        assert!(received.starts_with("HTTP/1.1 200"));
    }
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    registry.shutdown();
}

#[tokio::test]
async fn test_dead_backend_gives_503() {
    let dead = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let dir = tempfile::tempdir().unwrap();
    let node_file = dir.path().join("nodes");
    common::write_node_file(&node_file, &[dead]);

    let registry = Registry::new(common::fast_settings());
    common::ready_pool(&registry, "web", &node_file).await;
    let addr = proxy_service(&registry, "web").await;

    let resp = common::client()
        .get(format!("http://{}/", addr))
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);

    registry.shutdown();
}

#[tokio::test]
async fn test_node_file_change_moves_traffic() {
    let old = common::start_fixed_backend("old").await;
    let new = common::start_fixed_backend("new").await;

    let dir = tempfile::tempdir().unwrap();
    let node_file = dir.path().join("nodes");
    common::write_node_file(&node_file, &[old]);

    let registry = Registry::new(common::fast_settings());
    let pool = common::ready_pool(&registry, "web", &node_file).await;
    let addr = proxy_service(&registry, "web").await;
    let client = common::client();

    let body = client.get(format!("http://{}/", addr)).send().await.unwrap().text().await.unwrap();
    assert_eq!(body, "old");

    common::write_node_file(&node_file, &[new]);
    let file = std::fs::File::options().write(true).open(&node_file).unwrap();
    file.set_modified(std::time::SystemTime::now() + Duration::from_secs(5)).unwrap();
    pool.reconcile().await.unwrap();
    assert_eq!(pool.backends().len(), 1);

    let body = client.get(format!("http://{}/", addr)).send().await.unwrap().text().await.unwrap();
    assert_eq!(body, "new");

    registry.shutdown();
}

/// Read one response off `stream` and return its body.
async fn read_response(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).await.unwrap();
        assert!(n > 0, "connection closed inside response head");
        head.push(byte[0]);
    }
    let head = String::from_utf8(head).unwrap();
    assert!(head.starts_with("HTTP/1.1 200"), "unexpected response: {head}");
    let length: usize = head
        .lines()
        .find_map(|l| l.strip_prefix("content-length: "))
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).await.unwrap();
    String::from_utf8(body).unwrap()
}

#[tokio::test]
async fn test_concurrent_clients_get_only_their_responses() {
    let backend = common::start_backend(true, |head| async move {
        let path = head.split_whitespace().nth(1).unwrap_or("?").to_string();
        // Uneven delays so the two clients' exchanges overlap.
        let delay = if path.starts_with("/a/") { 15 } else { 5 };
        tokio::time::sleep(Duration::from_millis(delay)).await;
        ("200 OK", format!("echo {}", path))
    })
    .await;

    let dir = tempfile::tempdir().unwrap();
    let node_file = dir.path().join("nodes");
    common::write_node_file(&node_file, &[backend]);

    let registry = Registry::new(common::fast_settings());
    common::ready_pool(&registry, "web", &node_file).await;
    let addr = proxy_service(&registry, "web").await;

    let client = |name: &'static str| async move {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut bodies = Vec::new();
        for i in 0..5 {
            let request = format!("GET /{}/{} HTTP/1.1\r\nHost: test\r\n\r\n", name, i);
            stream.write_all(request.as_bytes()).await.unwrap();
            bodies.push(read_response(&mut stream).await);
        }
        bodies
    };

    let (a, b) = tokio::join!(client("a"), client("b"));
    let expected = |name: &str| (0..5).map(|i| format!("echo /{}/{}", name, i)).collect::<Vec<_>>();
    assert_eq!(a, expected("a"));
    assert_eq!(b, expected("b"));

    registry.shutdown();
}
