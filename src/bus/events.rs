//! Push-channel wire events.
//!
//! JSON text frames tagged by `event`:
//! ```text
//! {"event":"reqResJson","messages":[...],"queuedCount":0,"ackId":1}
//! {"event":"ack","ackId":1}
//! ```

use serde::{Deserialize, Serialize};

use crate::breakpoint::Breakpoint;
use crate::message::{Body, Message};
use crate::routing::RouteRule;

/// Proxy → viewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Effective route set.
    ProxyConfig { rules: Vec<RouteRule> },
    /// One delivery batch; the next one follows only after `ack`.
    ReqResJson {
        messages: Vec<Message>,
        queued_count: usize,
        ack_id: u64,
    },
    /// A Message held by a breakpoint, awaiting `resume`.
    Breakpoint { message: Message },
    /// Current breakpoint list.
    Breakpoints { breakpoints: Vec<Breakpoint> },
    Error { message: String },
}

/// Viewer → proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// Full-set route replace; also the viewer's route declaration.
    ProxyConfig { rules: Vec<RouteRule> },
    Ack { ack_id: u64 },
    Stopped { stopped: bool },
    /// Release a held Message, optionally replacing its response body.
    Resume {
        sequence_number: u64,
        #[serde(default)]
        response_body: Option<Body>,
    },
    Breakpoints { breakpoints: Vec<Breakpoint> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_event_shapes() {
        let ack: ClientEvent = serde_json::from_value(json!({"event": "ack", "ackId": 4})).unwrap();
        assert!(matches!(ack, ClientEvent::Ack { ack_id: 4 }));

        let resume: ClientEvent = serde_json::from_value(json!({
            "event": "resume",
            "sequenceNumber": 9,
            "responseBody": {"edited": true}
        }))
        .unwrap();
        match resume {
            ClientEvent::Resume { sequence_number, response_body } => {
                assert_eq!(sequence_number, 9);
                assert_eq!(response_body, Some(Body::Json(json!({"edited": true}))));
            }
            other => panic!("unexpected {:?}", other),
        }

        let plain: ClientEvent =
            serde_json::from_value(json!({"event": "resume", "sequenceNumber": 9})).unwrap();
        assert!(matches!(plain, ClientEvent::Resume { response_body: None, .. }));
    }

    #[test]
    fn test_server_event_tag() {
        let event = ServerEvent::ReqResJson {
            messages: Vec::new(),
            queued_count: 3,
            ack_id: 1,
        };
        let wire = serde_json::to_value(&event).unwrap();
        assert_eq!(wire, json!({"event": "reqResJson", "messages": [], "queuedCount": 3, "ackId": 1}));
    }
}
