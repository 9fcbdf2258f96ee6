//! Records produced by protocol decoders outside the HTTP path.

use serde::Deserialize;

use crate::message::{now_millis, Body, Headers, Message};
use crate::routing::{Protocol, RouteRule};

/// A Message-shaped record without sequence numbers.
///
/// Posted to the ingest endpoint by gRPC/Mongo/Redis/MySQL decoders and log
/// shippers. Missing fields take neutral defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalRecord {
    pub protocol: Protocol,
    #[serde(default)]
    pub timestamp: Option<u64>,
    #[serde(default)]
    pub elapsed_time: u64,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub client_ip: String,
    #[serde(default)]
    pub server_host: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub request_headers: Headers,
    #[serde(default)]
    pub request_body: Body,
    #[serde(default)]
    pub response_headers: Headers,
    #[serde(default)]
    pub response_body: Body,
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub proxy_config: Option<RouteRule>,
    #[serde(default)]
    pub note: String,
}

impl ExternalRecord {
    pub(crate) fn into_message(self, sequence_number: u64, sequence_number_res: u64) -> Message {
        let proxy_config = self.proxy_config.unwrap_or_else(|| {
            let (hostname, port) = split_host(&self.server_host);
            RouteRule {
                is_secure: false,
                path: self.path.clone(),
                protocol: self.protocol,
                hostname,
                port,
                recording: true,
                host_reachable: true,
                comment: String::new(),
            }
        });
        let endpoint = if self.endpoint.is_empty() {
            self.url
                .rsplit('/')
                .find(|s| !s.is_empty())
                .unwrap_or_default()
                .to_string()
        } else {
            self.endpoint
        };

        Message {
            sequence_number,
            sequence_number_res,
            timestamp: self.timestamp.unwrap_or_else(now_millis),
            elapsed_time: self.elapsed_time,
            method: self.method,
            url: self.url,
            endpoint,
            protocol: self.protocol.to_string(),
            client_ip: self.client_ip,
            server_host: self.server_host,
            path: self.path,
            request_headers: self.request_headers,
            request_body: self.request_body,
            response_headers: self.response_headers,
            response_body: self.response_body,
            status: self.status,
            proxy_config,
            note: self.note,
            json_truncated: false,
        }
    }
}

fn split_host(server_host: &str) -> (String, u16) {
    match server_host.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (server_host.to_string(), 0),
        },
        None => (server_host.to_string(), 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_minimal_record() {
        let record: ExternalRecord = serde_json::from_value(json!({
            "protocol": "redis:",
            "url": "GET user:1",
            "serverHost": "cache:6379",
            "responseBody": "\"ada\""
        }))
        .unwrap();
        let message = record.into_message(10, 11);

        assert_eq!(message.sequence_number, 10);
        assert_eq!(message.sequence_number_res, 11);
        assert_eq!(message.protocol, "redis:");
        assert_eq!(message.proxy_config.protocol, Protocol::Redis);
        assert_eq!(message.proxy_config.hostname, "cache");
        assert_eq!(message.proxy_config.port, 6379);
        assert!(message.proxy_config.recording);
        assert!(message.is_complete());
    }

    #[test]
    fn test_explicit_rule_is_kept() {
        let record: ExternalRecord = serde_json::from_value(json!({
            "protocol": "log:",
            "proxyConfig": {"protocol": "log:", "path": "app", "recording": false},
            "responseBody": {"level": "error"}
        }))
        .unwrap();
        let message = record.into_message(1, 2);
        assert!(!message.proxy_config.recording);
        assert_eq!(message.response_body.json().unwrap()["level"], "error");
    }
}
