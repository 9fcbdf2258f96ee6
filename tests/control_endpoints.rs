//! Control endpoints exercised in-process through the router.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::connect_info::MockConnectInfo,
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use capture_proxy::http::HttpServer;
use capture_proxy::store::{MemoryStore, StateStore, PROXY_DIRECTIVES};

mod common;

fn app() -> (HttpServer, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let server = HttpServer::new(&common::test_config(), store.clone()).unwrap();
    (server, store)
}

fn router(server: &HttpServer) -> Router {
    let client: SocketAddr = "127.0.0.1:50000".parse().unwrap();
    server.router().layer(MockConnectInfo(client))
}

async fn call(router: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_status_reports_state() {
    let (server, _) = app();
    let (status, body) = call(router(&server), Method::GET, "/_viewer/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "operational");
    assert_eq!(body["routes"], 0);
    assert_eq!(body["viewers"], 0);
    assert_eq!(body["held"], json!([]));
}

#[tokio::test]
async fn test_put_routes_rejects_invalid_set() {
    let (server, store) = app();
    let rules = json!([
        {"protocol": "http:", "path": "api", "hostname": "localhost", "port": 9000},
        {"protocol": "redis:", "path": "6380", "hostname": "", "port": 6379},
    ]);
    let (status, body) = call(router(&server), Method::PUT, "/_viewer/routes", Some(rules)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"].as_array().unwrap().len(), 2);
    assert!(server.state().routes.snapshot().is_empty());
    assert!(store.load(PROXY_DIRECTIVES).unwrap().is_none());
}

#[tokio::test]
async fn test_put_routes_replaces_and_persists() {
    let (server, store) = app();
    let rules = json!([
        {"protocol": "http:", "path": "/api", "hostname": "localhost", "port": 9000},
    ]);
    let (status, _) = call(router(&server), Method::PUT, "/_viewer/routes", Some(rules)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(router(&server), Method::GET, "/_viewer/routes", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["path"], "/api");
    assert_eq!(body[0]["recording"], true);

    let persisted = store.load(PROXY_DIRECTIVES).unwrap().unwrap();
    assert_eq!(persisted[0]["hostname"], "localhost");
}

#[tokio::test]
async fn test_put_breakpoints_rejects_bad_regex() {
    let (server, _) = app();
    let breakpoints = json!([{"filter": "(", "regex": true}]);
    let (status, body) = call(router(&server), Method::PUT, "/_viewer/breakpoints", Some(breakpoints)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
    assert!(server.state().breakpoints.list().is_empty());
}

#[tokio::test]
async fn test_ingest_assigns_sequence_numbers() {
    let (server, _) = app();
    let records = json!([
        {"protocol": "redis:", "method": "REDIS", "url": "GET session:1", "serverHost": "cache:6379"},
        {"protocol": "log:", "url": "worker started", "responseBody": "ok"},
    ]);
    let (status, body) = call(router(&server), Method::POST, "/_viewer/ingest", Some(records)).await;
    assert_eq!(status, StatusCode::OK);

    let numbers: Vec<u64> = serde_json::from_value(body["sequenceNumbers"].clone()).unwrap();
    assert_eq!(numbers.len(), 2);
    assert!(numbers[0] < numbers[1]);
}

#[tokio::test]
async fn test_landing_and_unmatched() {
    let (server, _) = app();
    let (status, body) = call(router(&server), Method::GET, "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "capture-proxy");

    let (status, body) = call(router(&server), Method::GET, "/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"error": "No matching proxy configuration found for /missing"}));
}
