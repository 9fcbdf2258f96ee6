//! Request-side capture.

use bytes::Bytes;
use serde_json::Value;

use crate::message::{Body, Headers};
use crate::routing::RouteRule;

/// Everything known about a request once its body has been read.
#[derive(Debug, Clone)]
pub struct RequestCapture {
    pub method: String,
    /// Path and query, or the absolute URL for forward-proxy requests.
    pub url: String,
    pub client_ip: String,
    pub server_host: String,
    pub rule: RouteRule,
    pub headers: Headers,
    pub body: Bytes,
}

impl RequestCapture {
    /// URL path without query or fragment, also for absolute URLs.
    pub fn url_path(&self) -> &str {
        let rest = match self.url.find("://") {
            Some(idx) => {
                let after = &self.url[idx + 3..];
                after.find('/').map(|i| &after[i..]).unwrap_or("/")
            }
            None => self.url.as_str(),
        };
        rest.split(['?', '#']).next().unwrap_or(rest)
    }
}

/// Body as captured in the Message: JSON when it parses, raw text otherwise.
/// Returns whether the text was cut at `limit` bytes.
pub fn capture_request_body(bytes: &[u8], limit: usize) -> (Body, bool) {
    let (text, truncated) = truncated_text(bytes, limit);
    if truncated {
        (Body::Raw(text), true)
    } else {
        (Body::parse(&text), false)
    }
}

/// Lossy UTF-8 text of `bytes`, cut to at most `limit` bytes on a char boundary.
pub(crate) fn truncated_text(bytes: &[u8], limit: usize) -> (String, bool) {
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    if text.len() <= limit {
        return (text, false);
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    (text, true)
}

/// Last non-empty path segment. For `/graphql` the operation names of the
/// request body are used instead.
pub fn derive_endpoint(path: &str, body: &Body) -> String {
    let segment = path
        .rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_string();

    if segment != "graphql" {
        return segment;
    }
    let names: Vec<&str> = match body.json() {
        Some(Value::Array(ops)) => ops.iter().filter_map(operation_name).collect(),
        Some(op @ Value::Object(_)) => operation_name(op).into_iter().collect(),
        _ => Vec::new(),
    };
    if names.is_empty() {
        segment
    } else {
        names.join(",")
    }
}

fn operation_name(op: &Value) -> Option<&str> {
    op.get("operationName")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}
