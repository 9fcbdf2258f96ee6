//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store the current rule set
//! - Look up the matching route for a request URI
//! - Return the matched route or an explicit RouteNotFound
//!
//! # Design Decisions
//! - Replacement is a full-set atomic swap; readers never see a half-updated table
//! - Lookups work on a snapshot and never mutate
//! - O(n) path prefix scan (acceptable for typical route counts)

use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::http::Uri;

use crate::error::CaptureError;
use crate::routing::matcher::{forward_rule, longest_prefix, port_rule};
use crate::routing::rule::RouteRule;

/// The live set of route rules.
#[derive(Debug)]
pub struct RouteTable {
    rules: ArcSwap<Vec<RouteRule>>,
}

impl RouteTable {
    pub fn new(rules: Vec<RouteRule>) -> Self {
        Self {
            rules: ArcSwap::from_pointee(rules),
        }
    }

    /// Replace the whole rule set.
    pub fn replace(&self, rules: Vec<RouteRule>) {
        tracing::info!(rules = rules.len(), "Route table replaced");
        self.rules.store(Arc::new(rules));
    }

    /// Current rule set.
    pub fn snapshot(&self) -> Arc<Vec<RouteRule>> {
        self.rules.load_full()
    }

    /// Resolve the rule for an inbound request URI.
    ///
    /// Longest HTTP-family prefix first, then a synthesized forward-proxy
    /// rule for absolute-form URIs.
    pub fn resolve(&self, uri: &Uri) -> Result<RouteRule, CaptureError> {
        let rules = self.rules.load();
        if let Some(rule) = longest_prefix(&rules, uri.path()) {
            return Ok(rule.clone());
        }
        forward_rule(uri).ok_or_else(|| CaptureError::RouteNotFound {
            path: uri.path().to_string(),
        })
    }

    /// Resolve the relayed rule listening on `port`.
    pub fn resolve_port(&self, port: u16) -> Option<RouteRule> {
        port_rule(&self.rules.load(), port).cloned()
    }

    /// Rules served by the TCP capture relay.
    pub fn relayed(&self) -> Vec<RouteRule> {
        self.rules
            .load()
            .iter()
            .filter(|r| r.protocol.is_relayed() && r.listen_port().is_some())
            .cloned()
            .collect()
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::Protocol;

    #[test]
    fn test_resolve_reverse_rule() {
        let table = RouteTable::new(vec![RouteRule::http("/api", "localhost", 9000)]);
        let uri: Uri = "/api/users".parse().unwrap();
        let rule = table.resolve(&uri).unwrap();
        assert_eq!(rule.hostname, "localhost");
        assert_eq!(rule.port, 9000);
    }

    #[test]
    fn test_resolve_not_found() {
        let table = RouteTable::new(vec![RouteRule::http("/api", "localhost", 9000)]);
        let uri: Uri = "/unknown".parse().unwrap();
        let err = table.resolve(&uri).unwrap_err();
        assert_eq!(err, CaptureError::RouteNotFound { path: "/unknown".into() });
    }

    #[test]
    fn test_resolve_forward_fallback() {
        let table = RouteTable::default();
        let uri: Uri = "http://example.com:8080/x".parse().unwrap();
        let rule = table.resolve(&uri).unwrap();
        assert_eq!(rule.protocol, Protocol::BrowserForward);
        assert_eq!(rule.port, 8080);
    }

    #[test]
    fn test_replace_swaps_whole_set() {
        let table = RouteTable::new(vec![RouteRule::http("/old", "a", 1)]);
        let before = table.snapshot();
        table.replace(vec![RouteRule::http("/new", "b", 2)]);

        assert_eq!(before[0].path, "/old");
        assert_eq!(table.snapshot()[0].path, "/new");
        assert!(table.resolve(&"/old".parse().unwrap()).is_err());
    }

    #[test]
    fn test_relayed_rules() {
        let mut redis = RouteRule::http("6380", "localhost", 6379);
        redis.protocol = Protocol::Redis;
        let table = RouteTable::new(vec![RouteRule::http("/", "web", 80), redis]);
        assert_eq!(table.relayed().len(), 1);
        assert_eq!(table.resolve_port(6380).unwrap().port, 6379);
    }
}
