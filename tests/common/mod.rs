//! Shared utilities for integration testing.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anycast_router::cloud::{InMemoryRoutingApi, NodeIdentity};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

/// Start a programmable mock service. Each connection gets the status line
/// and body returned by `f`, then the socket is closed.
pub async fn start_programmable_backend<F, Fut>(addr: SocketAddr, f: F)
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await.unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let (status, body) = f().await;
                        let status_text = match status {
                            200 => "200 OK",
                            503 => "503 Service Unavailable",
                            _ => "500 Internal Server Error",
                        };

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });
}

/// Start a service whose health follows the returned switch.
pub async fn start_switchable_backend(addr: SocketAddr) -> Arc<AtomicBool> {
    let up = Arc::new(AtomicBool::new(true));
    let flag = up.clone();
    start_programmable_backend(addr, move || {
        let flag = flag.clone();
        async move {
            if flag.load(Ordering::SeqCst) {
                (200, "up".into())
            } else {
                (503, "down".into())
            }
        }
    })
    .await;
    up
}

pub fn node(instance_id: &str, private_ip: &str) -> NodeIdentity {
    NodeIdentity {
        instance_id: instance_id.into(),
        private_ip: private_ip.parse::<IpAddr>().unwrap(),
        subnet_id: None,
        region: None,
    }
}

/// Mark every node as a router and give it one interface.
pub fn register_nodes(api: &InMemoryRoutingApi, nodes: &[(&NodeIdentity, &str)]) {
    for (node, eni) in nodes {
        api.add_interface(eni, &node.instance_id, node.private_ip);
        api.set_source_dest_check_disabled(&node.instance_id, true);
    }
}

/// Poll `check` every 100ms until it holds or `within` elapses.
pub async fn eventually<F>(within: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    check()
}

pub fn fixture(name: &str) -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}
