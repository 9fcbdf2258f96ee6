//! Route matching logic.
//!
//! # Responsibilities
//! - Match request path prefix (case-sensitive)
//! - Pick the longest matching prefix among HTTP-family rules
//! - Synthesize a forward-proxy rule from an absolute request URI
//!
//! # Design Decisions
//! - Pure functions over a rule slice; no state is touched while matching
//! - Equal-length prefixes resolve to the first configured rule
//! - No regex to guarantee O(n) matching

use axum::http::Uri;

use crate::routing::rule::{Protocol, RouteRule};

/// Matches the request path prefix.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher<'a> {
    prefix: &'a str,
}

impl<'a> PathPrefixMatcher<'a> {
    pub fn new(prefix: &'a str) -> Self {
        Self { prefix }
    }

    /// Length of the matched prefix, if `path` starts with it.
    pub fn match_len(&self, path: &str) -> Option<usize> {
        path.starts_with(self.prefix).then_some(self.prefix.len())
    }
}

/// Select the HTTP-family rule whose `path` is the longest prefix of `path`.
pub fn longest_prefix<'a>(rules: &'a [RouteRule], path: &str) -> Option<&'a RouteRule> {
    let mut best: Option<(usize, &RouteRule)> = None;
    for rule in rules.iter().filter(|r| r.protocol.is_http_family()) {
        // Browser-forward rules are declarations, not reverse-proxy targets.
        if rule.protocol == Protocol::BrowserForward {
            continue;
        }
        if let Some(len) = PathPrefixMatcher::new(&rule.path).match_len(path) {
            if best.map_or(true, |(best_len, _)| len > best_len) {
                best = Some((len, rule));
            }
        }
    }
    best.map(|(_, rule)| rule)
}

/// Build a forward-proxy rule from an absolute-form request URI.
///
/// Returns `None` for origin-form URIs (`/path`).
pub fn forward_rule(uri: &Uri) -> Option<RouteRule> {
    let host = uri.host()?;
    let secure = match uri.scheme_str()? {
        "https" => true,
        "http" => false,
        _ => return None,
    };
    let port = uri.port_u16().unwrap_or(if secure { 443 } else { 80 });
    Some(RouteRule::forward(secure, host, port))
}

/// Find the relayed rule listening on `port`.
pub fn port_rule(rules: &[RouteRule], port: u16) -> Option<&RouteRule> {
    rules.iter().find(|r| r.listen_port() == Some(port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_matcher() {
        let matcher = PathPrefixMatcher::new("/api");
        assert_eq!(matcher.match_len("/api/v1"), Some(4));
        assert_eq!(matcher.match_len("/images"), None);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let rules = vec![
            RouteRule::http("/a", "one", 1),
            RouteRule::http("/ab", "two", 2),
            RouteRule::http("/", "root", 3),
        ];
        assert_eq!(longest_prefix(&rules, "/ab/x").unwrap().path, "/ab");
        assert_eq!(longest_prefix(&rules, "/a/x").unwrap().path, "/a");
        assert_eq!(longest_prefix(&rules, "/zzz").unwrap().path, "/");
    }

    #[test]
    fn test_longest_prefix_ignores_other_protocols() {
        let mut redis = RouteRule::http("/api", "localhost", 6379);
        redis.protocol = Protocol::Redis;
        let rules = vec![redis, RouteRule::forward(false, "", 0)];
        assert!(longest_prefix(&rules, "/api/users").is_none());
    }

    #[test]
    fn test_first_rule_wins_ties() {
        let rules = vec![
            RouteRule::http("/api", "first", 1),
            RouteRule::http("/api", "second", 2),
        ];
        assert_eq!(longest_prefix(&rules, "/api/x").unwrap().hostname, "first");
    }

    #[test]
    fn test_forward_rule() {
        let uri: Uri = "http://example.com/search?q=1".parse().unwrap();
        let rule = forward_rule(&uri).unwrap();
        assert_eq!(rule.hostname, "example.com");
        assert_eq!(rule.port, 80);
        assert!(!rule.recording);
        assert_eq!(rule.protocol, Protocol::BrowserForward);

        let uri: Uri = "https://example.com:8443/".parse().unwrap();
        let rule = forward_rule(&uri).unwrap();
        assert!(rule.is_secure);
        assert_eq!(rule.port, 8443);

        let uri: Uri = "/relative".parse().unwrap();
        assert!(forward_rule(&uri).is_none());
    }

    #[test]
    fn test_port_rule() {
        let mut tcp = RouteRule::http("7000", "db", 5432);
        tcp.protocol = Protocol::Tcp;
        let rules = vec![RouteRule::http("/", "web", 80), tcp];
        assert_eq!(port_rule(&rules, 7000).unwrap().hostname, "db");
        assert!(port_rule(&rules, 80).is_none());
    }
}
