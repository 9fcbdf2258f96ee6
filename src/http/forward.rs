//! Upstream forwarding.
//!
//! # Responsibilities
//! - Rewrite the inbound request for the matched route
//! - Send it upstream and buffer the response for capture
//! - Inject configured Basic-Auth credentials per target host
//!
//! # Design Decisions
//! - Redirects are returned to the client, never followed
//! - System proxies are ignored so the proxy never loops through itself
//! - Bodies are re-framed after capture, so hop-by-hop headers are stripped
//!   in both directions

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::http::{header, HeaderMap, HeaderValue, Method, Uri};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::{Bytes, BytesMut};

use crate::capture::ResponseCapture;
use crate::config::{ProxyConfig, UpstreamCredential};
use crate::error::{CaptureError, StartupError};
use crate::routing::RouteRule;

/// Headers that describe one connection and are never forwarded.
pub const HOP_BY_HOP: [&str; 7] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
];

/// A request rewritten for its upstream target.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Forwards matched requests to their upstream targets.
#[derive(Debug)]
pub struct ProxyDispatcher {
    client: reqwest::Client,
    credentials: ArcSwap<Vec<UpstreamCredential>>,
    max_body_bytes: usize,
}

impl ProxyDispatcher {
    pub fn new(config: &ProxyConfig) -> Result<Self, StartupError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .danger_accept_invalid_certs(config.upstream.accept_invalid_certs)
            .build()?;

        Ok(Self {
            client,
            credentials: ArcSwap::from_pointee(config.upstream.credentials.clone()),
            max_body_bytes: config.capture.max_body_bytes,
        })
    }

    /// Replace the credential set (config reload).
    pub fn set_credentials(&self, credentials: Vec<UpstreamCredential>) {
        tracing::info!(count = credentials.len(), "Upstream credentials replaced");
        self.credentials.store(Arc::new(credentials));
    }

    /// Rewrite an inbound request for `rule`.
    pub fn prepare(
        &self,
        rule: &RouteRule,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: Bytes,
    ) -> OutboundRequest {
        let path_and_query = uri.path_and_query().map_or("/", |pq| pq.as_str());
        let url = format!("{}://{}:{}{}", rule.scheme(), rule.hostname, rule.port, path_and_query);

        let mut headers = headers.clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(header::CONTENT_LENGTH);
        if let Ok(host) = HeaderValue::from_str(&rule.host_header()) {
            headers.insert(header::HOST, host);
        }

        if !headers.contains_key(header::AUTHORIZATION) {
            let credentials = self.credentials.load();
            if let Some(credential) = credentials.iter().find(|c| c.host == rule.hostname) {
                let token = STANDARD.encode(format!("{}:{}", credential.username, credential.password));
                if let Ok(value) = HeaderValue::from_str(&format!("Basic {token}")) {
                    headers.insert(header::AUTHORIZATION, value);
                }
            }
        }

        OutboundRequest {
            method: outbound_method(method, body.len()),
            url,
            headers,
            body,
        }
    }

    /// Send `outbound` and buffer the whole response.
    pub async fn forward(
        &self,
        rule: &RouteRule,
        outbound: OutboundRequest,
    ) -> Result<ResponseCapture, CaptureError> {
        let target = format!("{}:{}", rule.hostname, rule.port);
        tracing::debug!(method = %outbound.method, url = %outbound.url, "Forwarding upstream");

        let mut response = self
            .client
            .request(outbound.method, &outbound.url)
            .headers(outbound.headers)
            .body(outbound.body)
            .send()
            .await
            .map_err(|e| CaptureError::UpstreamConnect {
                target: target.clone(),
                reason: describe(&e),
            })?;

        let status = response.status().as_u16();
        let mut headers = response.headers().clone();
        strip_hop_by_hop(&mut headers);

        let mut body = BytesMut::new();
        loop {
            let chunk = response.chunk().await.map_err(|e| CaptureError::UpstreamBody {
                target: target.clone(),
                reason: describe(&e),
            })?;
            let Some(chunk) = chunk else { break };
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(CaptureError::UpstreamBody {
                    target,
                    reason: format!("response body exceeds {} bytes", self.max_body_bytes),
                });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(ResponseCapture {
            status,
            headers,
            body: body.freeze(),
        })
    }
}

/// GET with a body goes out as POST. Every other method is unchanged.
pub fn outbound_method(method: &Method, body_len: usize) -> Method {
    if method == Method::GET && body_len > 0 {
        Method::POST
    } else {
        method.clone()
    }
}

/// Remove hop-by-hop headers, including any named by `connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();
    for name in HOP_BY_HOP.iter().copied().chain(named.iter().map(String::as_str)) {
        headers.remove(name);
    }
}

fn describe(err: &dyn std::error::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        source = inner.source();
    }
    text
}
