//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use api_aggregator::config::AggregatorConfig;
use api_aggregator::discovery::StaticDelegate;
use api_aggregator::lifecycle::{
    create_aggregator_config, create_aggregator_server, SharedServerConfig, Shutdown,
};
use api_aggregator::registry::MemoryRegistry;

/// Start a mock backend that answers every request with 200 and a fixed body.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    start_programmable_backend(move |_path| async move { (200, response.to_string()) }).await
}

/// Start a mock backend whose answer is computed from the request path.
///
/// Binds an ephemeral loopback port and returns its address.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let mut buf = vec![0u8; 8192];
                        let n = socket.read(&mut buf).await.unwrap_or(0);
                        let head = String::from_utf8_lossy(&buf[..n]);
                        let path = head
                            .lines()
                            .next()
                            .and_then(|line| line.split_whitespace().nth(1))
                            .unwrap_or("/")
                            .to_string();

                        let (status, body) = f(path).await;
                        let status_text = match status {
                            200 => "200 OK",
                            404 => "404 Not Found",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
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

    addr
}

/// A running aggregator.
pub struct RunningAggregator {
    pub addr: SocketAddr,
    pub store: Arc<MemoryRegistry>,
    pub shutdown: Shutdown,
    pub handle: tokio::task::JoinHandle<()>,
}

impl RunningAggregator {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Bootstrap and serve an aggregator on an ephemeral loopback port.
pub async fn start_aggregator(config: AggregatorConfig) -> RunningAggregator {
    let shared = SharedServerConfig::new(config.listener.clone());
    let completed = create_aggregator_config(&shared, &config).unwrap();
    let store = Arc::new(MemoryRegistry::new(completed.storage.clone()));
    let delegate = StaticDelegate::new(config.delegate.listed_paths.clone());
    let shutdown = Shutdown::new();

    let server = create_aggregator_server(completed, &delegate, store.clone(), shutdown.clone()).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        server.run(listener).await.unwrap();
    });

    RunningAggregator {
        addr,
        store,
        shutdown,
        handle,
    }
}

/// HTTP client that never goes through a proxy or reuses connections.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
