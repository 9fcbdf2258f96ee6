//! Route rule definitions.

use serde::{Deserialize, Serialize};

/// Protocol a route captures. Serialized with the trailing colon used on the
/// wire (`"http:"`, `"redis:"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "http:")]
    Http,
    #[serde(rename = "https:")]
    Https,
    #[serde(rename = "browser:")]
    BrowserForward,
    #[serde(rename = "grpc:")]
    Grpc,
    #[serde(rename = "mongo:")]
    Mongo,
    #[serde(rename = "redis:")]
    Redis,
    #[serde(rename = "mysql:")]
    Mysql,
    #[serde(rename = "tcp:")]
    Tcp,
    #[serde(rename = "log:")]
    Log,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http:",
            Protocol::Https => "https:",
            Protocol::BrowserForward => "browser:",
            Protocol::Grpc => "grpc:",
            Protocol::Mongo => "mongo:",
            Protocol::Redis => "redis:",
            Protocol::Mysql => "mysql:",
            Protocol::Tcp => "tcp:",
            Protocol::Log => "log:",
        }
    }

    /// HTTP, HTTPS and browser-forward rules are matched by URL path prefix.
    pub fn is_http_family(&self) -> bool {
        matches!(self, Protocol::Http | Protocol::Https | Protocol::BrowserForward)
    }

    /// Protocols served by the raw TCP capture relay.
    pub fn is_relayed(&self) -> bool {
        matches!(
            self,
            Protocol::Grpc | Protocol::Mongo | Protocol::Redis | Protocol::Mysql | Protocol::Tcp
        )
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_true() -> bool {
    true
}

/// A configured mapping from an inbound path (or listen port) to an upstream.
///
/// `path` is a URL-path prefix for HTTP-family rules and a listen-port
/// selector for every other protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRule {
    #[serde(default)]
    pub is_secure: bool,
    #[serde(default)]
    pub path: String,
    pub protocol: Protocol,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default = "default_true")]
    pub recording: bool,
    #[serde(default = "default_true")]
    pub host_reachable: bool,
    #[serde(default)]
    pub comment: String,
}

impl RouteRule {
    /// A recording HTTP reverse-proxy rule.
    pub fn http(path: impl Into<String>, hostname: impl Into<String>, port: u16) -> Self {
        Self {
            is_secure: false,
            path: path.into(),
            protocol: Protocol::Http,
            hostname: hostname.into(),
            port,
            recording: true,
            host_reachable: true,
            comment: String::new(),
        }
    }

    /// Rule synthesized for an absolute-URL (forward proxy) request.
    pub fn forward(is_secure: bool, hostname: impl Into<String>, port: u16) -> Self {
        Self {
            is_secure,
            path: String::new(),
            protocol: Protocol::BrowserForward,
            hostname: hostname.into(),
            port,
            recording: false,
            host_reachable: true,
            comment: String::new(),
        }
    }

    /// Rule attached to a synthetic error Message when nothing matched.
    pub fn unmatched(path: impl Into<String>) -> Self {
        Self {
            is_secure: false,
            path: path.into(),
            protocol: Protocol::Http,
            hostname: String::new(),
            port: 0,
            recording: true,
            host_reachable: false,
            comment: "no matching route".to_string(),
        }
    }

    /// Upstream URL scheme.
    pub fn scheme(&self) -> &'static str {
        match self.protocol {
            Protocol::Https => "https",
            _ if self.is_secure => "https",
            _ => "http",
        }
    }

    /// Value for the outbound `Host` header: the hostname, plus the port
    /// when it is not the scheme's default.
    pub fn host_header(&self) -> String {
        let default_port = if self.scheme() == "https" { 443 } else { 80 };
        if self.port == 0 || self.port == default_port {
            self.hostname.clone()
        } else {
            format!("{}:{}", self.hostname, self.port)
        }
    }

    /// Listen port for relayed protocols.
    pub fn listen_port(&self) -> Option<u16> {
        if self.protocol.is_http_family() {
            return None;
        }
        self.path.trim().parse::<u16>().ok().filter(|p| *p != 0)
    }

    /// True for the rule `unmatched` builds: HTTP with no upstream host.
    /// Configured HTTP rules always carry a hostname.
    pub fn is_unmatched(&self) -> bool {
        self.protocol == Protocol::Http && self.hostname.is_empty() && self.port == 0
    }

    /// Whether two rules describe the same route. Browser-forward rules
    /// cover every forwarded host.
    pub fn same_route(&self, other: &RouteRule) -> bool {
        if self.protocol != other.protocol || self.path != other.path {
            return false;
        }
        self.protocol == Protocol::BrowserForward
            || (self.hostname == other.hostname && self.port == other.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_wire_names() {
        let rule: RouteRule = serde_json::from_str(
            r#"{"path":"/api","protocol":"http:","hostname":"localhost","port":9000}"#,
        )
        .unwrap();
        assert_eq!(rule.protocol, Protocol::Http);
        assert!(rule.recording);
        assert!(rule.host_reachable);
        assert!(!rule.is_secure);

        let json = serde_json::to_value(&RouteRule::forward(true, "example.com", 443)).unwrap();
        assert_eq!(json["protocol"], "browser:");
        assert_eq!(json["isSecure"], true);
        assert_eq!(json["recording"], false);
    }

    #[test]
    fn test_host_header() {
        assert_eq!(RouteRule::http("/", "localhost", 9000).host_header(), "localhost:9000");
        assert_eq!(RouteRule::http("/", "example.com", 80).host_header(), "example.com");
        assert_eq!(RouteRule::forward(true, "example.com", 443).host_header(), "example.com");
        assert_eq!(RouteRule::forward(true, "example.com", 8443).host_header(), "example.com:8443");
    }

    #[test]
    fn test_listen_port_only_for_relayed() {
        let mut rule = RouteRule::http("6380", "localhost", 6379);
        assert_eq!(rule.listen_port(), None);
        rule.protocol = Protocol::Redis;
        assert_eq!(rule.listen_port(), Some(6380));
        rule.path = "/nope".into();
        assert_eq!(rule.listen_port(), None);
    }

    #[test]
    fn test_unmatched_rule() {
        assert!(RouteRule::unmatched("/unknown").is_unmatched());
        assert!(!RouteRule::http("/api", "localhost", 9000).is_unmatched());
        assert!(!RouteRule::forward(false, "", 0).is_unmatched());
    }

    #[test]
    fn test_same_route() {
        let a = RouteRule::http("/api", "localhost", 9000);
        let mut b = a.clone();
        b.recording = false;
        assert!(a.same_route(&b));
        b.port = 9001;
        assert!(!a.same_route(&b));

        let declared = RouteRule::forward(false, "", 0);
        assert!(declared.same_route(&RouteRule::forward(false, "example.com", 80)));
    }
}
