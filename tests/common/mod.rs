//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    http::{HeaderMap, Method, StatusCode, Uri},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use capture_proxy::bus::ServerEvent;
use capture_proxy::config::ProxyConfig;
use capture_proxy::http::{AppState, HttpServer};
use capture_proxy::lifecycle::Shutdown;
use capture_proxy::store::MemoryStore;
use capture_proxy::viewer::ViewerClient;

/// Serve `router` on an ephemeral port.
pub async fn start_backend(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

/// Backend that describes the request it received as JSON.
pub async fn start_echo_backend() -> SocketAddr {
    async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Json<Value> {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
        Json(json!({
            "method": method.as_str(),
            "uri": uri.to_string(),
            "host": header("host"),
            "authorization": header("authorization"),
            "body": String::from_utf8_lossy(&body),
        }))
    }

    let router = Router::new()
        .route("/plain", get(|| async { (StatusCode::OK, "plain text") }))
        .fallback(echo);
    start_backend(router).await
}

/// A port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Config with no ack pacing so tests see batches immediately.
pub fn test_config() -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.bus.ack_delay_ms = 0;
    config.bus.ack_timeout_secs = 5;
    config.headless = true;
    config
}

pub struct TestProxy {
    pub addr: SocketAddr,
    pub state: AppState,
    shutdown: Shutdown,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/_viewer/ws", self.addr)
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Run a proxy on an ephemeral port with an in-memory state store.
pub async fn start_proxy(config: ProxyConfig) -> TestProxy {
    let server = HttpServer::new(&config, Arc::new(MemoryStore::new())).unwrap();
    let state = server.state().clone();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let stop = shutdown.subscribe();
    let (_, config_updates) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let _ = server.run(listener, config_updates, stop).await;
    });

    TestProxy { addr, state, shutdown }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// Connect a viewer, declare the proxy's current routes and wait until the
/// declaration has been applied.
pub async fn connect_viewer(proxy: &TestProxy) -> ViewerClient {
    let mut viewer = ViewerClient::connect(&proxy.ws_url()).await.unwrap();
    let mut declared = false;
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), viewer.next_event())
            .await
            .unwrap()
            .unwrap();
        if let ServerEvent::ProxyConfig { rules } = event {
            if declared {
                return viewer;
            }
            viewer.declare(rules).await.unwrap();
            declared = true;
        }
    }
}
