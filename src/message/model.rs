//! The Message: one correlated request/response capture.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::routing::RouteRule;

/// Display text for a Message whose response has not been captured yet.
pub const NO_RESPONSE: &str = "No Response";

/// Captured headers, one entry per name. Repeated headers are joined with ", ".
pub type Headers = BTreeMap<String, String>;

/// A captured request or response body.
///
/// On the wire a `Raw` body is a JSON string, a `Json` body is the parsed
/// value itself, and `NoResponse` is `null`. A literal JSON `null` body is
/// kept as raw text so the placeholder stays unambiguous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum Body {
    Raw(String),
    Json(Value),
    NoResponse,
}

impl Body {
    /// Parse `text` as JSON, falling back to the raw string.
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(value) if !value.is_string() && !value.is_null() => Body::Json(value),
            _ => Body::Raw(text.to_string()),
        }
    }

    /// Text used for display and needle matching.
    pub fn text(&self) -> Cow<'_, str> {
        match self {
            Body::Raw(s) => Cow::Borrowed(s.as_str()),
            Body::Json(v) => Cow::Owned(v.to_string()),
            Body::NoResponse => Cow::Borrowed(NO_RESPONSE),
        }
    }

    /// The parsed JSON value, if this body was JSON.
    pub fn json(&self) -> Option<&Value> {
        match self {
            Body::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_no_response(&self) -> bool {
        matches!(self, Body::NoResponse)
    }
}

impl Default for Body {
    fn default() -> Self {
        Body::Raw(String::new())
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Body::NoResponse,
            Value::String(s) => Body::Raw(s),
            other => Body::Json(other),
        }
    }
}

impl From<Body> for Value {
    fn from(body: Body) -> Self {
        match body {
            Body::Raw(s) => Value::String(s),
            Body::Json(v) => v,
            Body::NoResponse => Value::Null,
        }
    }
}

/// One captured exchange.
///
/// Created incomplete when the request body has been read and completed in
/// place when the response ends; both states share `sequence_number`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub sequence_number: u64,
    /// Response-order key. Equal to `sequence_number` until completion.
    pub sequence_number_res: u64,
    /// Milliseconds since the Unix epoch at request capture.
    pub timestamp: u64,
    /// Milliseconds between request capture and completion.
    pub elapsed_time: u64,
    pub method: String,
    pub url: String,
    pub endpoint: String,
    pub protocol: String,
    pub client_ip: String,
    pub server_host: String,
    /// Path of the matched route.
    pub path: String,
    pub request_headers: Headers,
    pub request_body: Body,
    pub response_headers: Headers,
    pub response_body: Body,
    pub status: u16,
    pub proxy_config: RouteRule,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub json_truncated: bool,
}

impl Message {
    /// True once the response half has been captured.
    pub fn is_complete(&self) -> bool {
        !self.response_body.is_no_response()
    }

    /// `"{status} {method} {clientIp}->{serverHost} {url}"`.
    pub fn summary_line(&self) -> String {
        format!(
            "{} {} {}->{} {}",
            self.status, self.method, self.client_ip, self.server_host, self.url
        )
    }

    /// Flat object of the message's own fields, used by key:value filters.
    pub fn derived_fields(&self) -> Value {
        serde_json::json!({
            "sequenceNumber": self.sequence_number,
            "sequenceNumberRes": self.sequence_number_res,
            "timestamp": self.timestamp,
            "elapsedTime": self.elapsed_time,
            "status": self.status,
            "method": self.method,
            "url": self.url,
            "endpoint": self.endpoint,
            "protocol": self.protocol,
            "clientIp": self.client_ip,
            "serverHost": self.server_host,
            "path": self.path,
            "note": self.note,
        })
    }
}

/// Collapse an HTTP header map into captured headers.
pub fn collect_headers(headers: &HeaderMap) -> Headers {
    let mut out = Headers::new();
    for (name, value) in headers.iter() {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        out.entry(name.as_str().to_string())
            .and_modify(|existing: &mut String| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    out
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
