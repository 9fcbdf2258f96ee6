//! Configuration schema definitions.
//!
//! All sections default, so an empty file is a valid configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::routing::RouteRule;

/// Root configuration for the capture proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Data directory root. `None` means `$HOME/.allproxy`.
    pub data_dir: Option<PathBuf>,

    /// Do not open the companion window after listen succeeds.
    pub headless: bool,

    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Initial route rules. A persisted set takes precedence.
    pub routes: Vec<RouteRule>,

    pub capture: CaptureConfig,

    pub breakpoints: BreakpointConfig,

    /// Viewer delivery and flow control.
    pub bus: BusConfig,

    pub viewer: ViewerConfig,

    pub timeouts: TimeoutConfig,

    /// Upstream client behaviour and credentials.
    pub upstream: UpstreamConfig,

    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// `[host:]port`, e.g. "localhost:8888" or "9999".
    pub bind_address: String,

    /// Serve HTTPS instead of HTTP.
    pub ssl: bool,

    /// Certificate and key for `ssl`.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "localhost:8888".to_string(),
            ssl: false,
            tls: None,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Body capture settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Largest request or upstream body buffered, in bytes.
    pub max_body_bytes: usize,

    /// Decoded bodies beyond this are truncated in the Message.
    pub body_capture_limit: usize,

    /// Idle timeout for the response half. 0 disables it.
    pub correlation_timeout_secs: u64,
}

impl CaptureConfig {
    pub fn correlation_timeout(&self) -> Option<Duration> {
        (self.correlation_timeout_secs > 0).then(|| Duration::from_secs(self.correlation_timeout_secs))
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 50 * 1024 * 1024,
            body_capture_limit: 1024 * 1024,
            correlation_timeout_secs: 0,
        }
    }
}

/// Breakpoint hold settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakpointConfig {
    /// Release held responses after this many seconds. 0 waits forever.
    pub timeout_secs: u64,
}

impl BreakpointConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

/// Viewer delivery and flow control.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BusConfig {
    /// Pause after each acknowledged batch while the viewer is recording.
    pub ack_delay_ms: u64,

    /// Give up waiting for an acknowledgement after this long.
    pub ack_timeout_secs: u64,

    /// Messages queued per viewer before the oldest are dropped.
    pub max_pending: usize,

    /// Messages per batch.
    pub max_batch: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            ack_delay_ms: 3000,
            ack_timeout_secs: 30,
            max_pending: 10_000,
            max_batch: 1000,
        }
    }
}

/// Settings for the bundled viewer client.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Live buffer size before a tab is sealed.
    pub queue_limit: usize,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            queue_limit: crate::viewer::DEFAULT_QUEUE_LIMIT,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { connect_secs: 5 }
    }
}

/// Upstream client configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Accept self-signed or otherwise invalid upstream certificates.
    pub accept_invalid_certs: bool,

    /// Basic-Auth credentials injected per target host.
    pub credentials: Vec<UpstreamCredential>,
}

/// Credentials for one upstream host.
#[derive(Clone, Deserialize, Serialize)]
pub struct UpstreamCredential {
    /// Target hostname this credential applies to (exact match).
    pub host: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for UpstreamCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamCredential")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins.
    pub log_level: String,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::Protocol;

    #[test]
    fn test_empty_file_is_default() {
        let config: ProxyConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "localhost:8888");
        assert_eq!(config.bus.ack_delay_ms, 3000);
        assert_eq!(config.viewer.queue_limit, 50_000);
        assert!(config.capture.correlation_timeout().is_none());
        assert!(config.breakpoints.timeout().is_none());
    }

    #[test]
    fn test_routes_and_credentials() {
        let config: ProxyConfig = toml::from_str(
            r#"
            headless = true

            [[routes]]
            protocol = "http:"
            path = "/api"
            hostname = "localhost"
            port = 9000

            [[routes]]
            protocol = "redis:"
            path = "6380"
            hostname = "cache"
            port = 6379
            recording = false

            [breakpoints]
            timeout_secs = 30

            [[upstream.credentials]]
            host = "api.example.com"
            username = "user"
            password = "secret"
            "#,
        )
        .unwrap();

        assert!(config.headless);
        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.routes[1].protocol, Protocol::Redis);
        assert!(!config.routes[1].recording);
        assert_eq!(config.breakpoints.timeout(), Some(Duration::from_secs(30)));
        assert!(!format!("{:?}", config.upstream.credentials[0]).contains("secret"));
    }
}
