//! Per-viewer route declarations.

use crate::message::Message;
use crate::routing::RouteRule;

/// Identifier of one viewer connection.
pub type ViewerId = u64;

/// What one viewer wants to receive.
#[derive(Debug, Clone, Default)]
pub struct ViewerSubscription {
    pub connection_id: ViewerId,
    pub declared: Vec<RouteRule>,
}

impl ViewerSubscription {
    pub fn new(connection_id: ViewerId, declared: Vec<RouteRule>) -> Self {
        Self {
            connection_id,
            declared,
        }
    }

    /// The rule a Message is delivered under, or `None` if this viewer does
    /// not record it.
    ///
    /// Only routes the viewer declared are delivered, and the declared rule
    /// decides `recording`. Messages with no route (RouteNotFound) reach
    /// every viewer.
    pub fn admits(&self, message: &Message) -> Option<RouteRule> {
        let own = &message.proxy_config;
        let recording = if own.is_unmatched() {
            own.recording
        } else {
            self.declared.iter().find(|rule| rule.same_route(own))?.recording
        };

        recording.then(|| RouteRule {
            recording,
            ..own.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Body, Headers};

    fn message(rule: RouteRule) -> Message {
        Message {
            sequence_number: 1,
            sequence_number_res: 1,
            timestamp: 0,
            elapsed_time: 0,
            method: "GET".into(),
            url: "/".into(),
            endpoint: String::new(),
            protocol: "http:".into(),
            client_ip: String::new(),
            server_host: String::new(),
            path: rule.path.clone(),
            request_headers: Headers::new(),
            request_body: Body::default(),
            response_headers: Headers::new(),
            response_body: Body::NoResponse,
            status: 0,
            proxy_config: rule,
            note: String::new(),
            json_truncated: false,
        }
    }

    #[test]
    fn test_undeclared_route_is_refused() {
        let sub = ViewerSubscription::new(1, vec![RouteRule::http("/api", "localhost", 9000)]);
        assert!(sub.admits(&message(RouteRule::http("/api", "localhost", 9000))).is_some());
        assert!(sub.admits(&message(RouteRule::http("/other", "localhost", 9000))).is_none());

        let mut forward = RouteRule::forward(false, "example.com", 80);
        forward.recording = true;
        assert!(sub.admits(&message(forward)).is_none());

        assert!(ViewerSubscription::default()
            .admits(&message(RouteRule::http("/api", "localhost", 9000)))
            .is_none());
    }

    #[test]
    fn test_unmatched_reaches_every_viewer() {
        let unmatched = message(RouteRule::unmatched("/unknown"));
        assert!(ViewerSubscription::default().admits(&unmatched).is_some());
        let sub = ViewerSubscription::new(1, vec![RouteRule::http("/api", "localhost", 9000)]);
        assert!(sub.admits(&unmatched).is_some());
    }

    #[test]
    fn test_declared_rule_overrides_recording() {
        let mut off = RouteRule::http("/api", "localhost", 9000);
        off.recording = false;
        let sub = ViewerSubscription::new(1, vec![off]);
        assert!(sub.admits(&message(RouteRule::http("/api", "localhost", 9000))).is_none());

        let mut browser = RouteRule::forward(false, "", 0);
        browser.recording = true;
        let sub = ViewerSubscription::new(2, vec![browser]);
        let delivered = sub
            .admits(&message(RouteRule::forward(false, "example.com", 80)))
            .unwrap();
        assert!(delivered.recording);
        assert_eq!(delivered.hostname, "example.com");
    }
}
