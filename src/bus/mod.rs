//! Message bus: fan-out of captured Messages to viewers.
//!
//! # Data Flow
//! ```text
//! Correlator / BreakpointGate / relay / ingest
//!     → MessageBus::publish(Message)
//!     → per viewer: ViewerSubscription::admits (route declaration, recording)
//!     → ViewerSlot pending queue (bounded, coalesces request-only entries)
//!     → delivery.rs task: reqResJson batch → ack → ack delay → next batch
//!     → websocket writer
//!
//! Control events (proxyConfig, breakpoint, breakpoints, error)
//!     → MessageBus::broadcast / send_to → websocket writer (unthrottled)
//! ```
//!
//! # Design Decisions
//! - The ack delay is a soft rate limit, not an error; a missing ack is
//!   abandoned after `ack_timeout_secs`
//! - Viewers that pause (stopped) are not throttled
//! - One delivery task per viewer, aborted on unsubscribe

pub mod delivery;
pub mod events;
pub mod subscription;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::BusConfig;
use crate::message::Message;
use crate::observability::metrics;
use crate::routing::RouteRule;

use self::delivery::{deliver, ViewerSlot};
pub use self::events::{ClientEvent, ServerEvent};
pub use self::subscription::{ViewerId, ViewerSubscription};

/// Fans Messages out to every subscribed viewer.
#[derive(Debug)]
pub struct MessageBus {
    config: BusConfig,
    viewers: DashMap<ViewerId, Arc<ViewerSlot>>,
    tasks: DashMap<ViewerId, JoinHandle<()>>,
    next_id: AtomicU64,
}

impl MessageBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            viewers: DashMap::new(),
            tasks: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a viewer. Events for it arrive on the returned receiver.
    ///
    /// Must be called inside a Tokio runtime: it spawns the delivery task.
    pub fn subscribe(
        &self,
        declared: Vec<RouteRule>,
    ) -> (ViewerId, mpsc::UnboundedReceiver<ServerEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (acks_tx, acks_rx) = mpsc::unbounded_channel();
        let slot = Arc::new(ViewerSlot::new(id, declared, events_tx, acks_tx));

        self.viewers.insert(id, Arc::clone(&slot));
        let task = tokio::spawn(deliver(slot, acks_rx, self.config.clone()));
        self.tasks.insert(id, task);

        metrics::set_viewers(self.viewers.len());
        tracing::info!(viewer = id, viewers = self.viewers.len(), "Viewer subscribed");
        (id, events_rx)
    }

    pub fn unsubscribe(&self, viewer: ViewerId) {
        self.viewers.remove(&viewer);
        if let Some((_, task)) = self.tasks.remove(&viewer) {
            task.abort();
        }
        metrics::set_viewers(self.viewers.len());
        tracing::info!(viewer, viewers = self.viewers.len(), "Viewer unsubscribed");
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    /// Queue a Message for every viewer that records its route.
    pub fn publish(&self, message: &Message) {
        for slot in self.viewers.iter() {
            let admitted = slot
                .subscription
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .admits(message);
            if let Some(rule) = admitted {
                let mut delivered = message.clone();
                delivered.proxy_config = rule;
                slot.enqueue(delivered, self.config.max_pending);
            }
        }
    }

    /// Send a control event to every viewer.
    pub fn broadcast(&self, event: ServerEvent) {
        for slot in self.viewers.iter() {
            let _ = slot.events.send(event.clone());
        }
    }

    /// Send a control event to one viewer.
    pub fn send_to(&self, viewer: ViewerId, event: ServerEvent) {
        if let Some(slot) = self.viewers.get(&viewer) {
            let _ = slot.events.send(event);
        }
    }

    /// Replace a viewer's route declaration.
    pub fn declare(&self, viewer: ViewerId, rules: Vec<RouteRule>) {
        if let Some(slot) = self.viewers.get(&viewer) {
            let mut subscription = slot
                .subscription
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            subscription.declared = rules;
        }
    }

    pub fn ack(&self, viewer: ViewerId, ack_id: u64) {
        if let Some(slot) = self.viewers.get(&viewer) {
            let _ = slot.acks.send(ack_id);
        }
    }

    pub fn set_stopped(&self, viewer: ViewerId, stopped: bool) {
        if let Some(slot) = self.viewers.get(&viewer) {
            slot.stopped.store(stopped, Ordering::Relaxed);
            tracing::debug!(viewer, stopped, "Viewer recording state changed");
        }
    }

    /// Messages waiting for delivery to `viewer`.
    pub fn queued(&self, viewer: ViewerId) -> usize {
        self.viewers.get(&viewer).map_or(0, |slot| slot.queued())
    }

    /// Messages dropped for `viewer` because its queue was full.
    pub fn dropped(&self, viewer: ViewerId) -> u64 {
        self.viewers
            .get(&viewer)
            .map_or(0, |slot| slot.dropped.load(Ordering::Relaxed))
    }
}

impl Drop for MessageBus {
    fn drop(&mut self) {
        for task in self.tasks.iter() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Body, Headers};
    use std::time::Duration;

    fn config() -> BusConfig {
        BusConfig {
            ack_delay_ms: 0,
            ack_timeout_secs: 30,
            max_pending: 100,
            max_batch: 10,
        }
    }

    fn api_rule() -> RouteRule {
        RouteRule::http("/api", "localhost", 9000)
    }

    fn message(seq: u64, response: Body) -> Message {
        Message {
            sequence_number: seq,
            sequence_number_res: seq,
            timestamp: 0,
            elapsed_time: 0,
            method: "GET".into(),
            url: "/api/x".into(),
            endpoint: "x".into(),
            protocol: "http:".into(),
            client_ip: "127.0.0.1".into(),
            server_host: "localhost:9000".into(),
            path: "/api".into(),
            request_headers: Headers::new(),
            request_body: Body::default(),
            response_headers: Headers::new(),
            response_body: response,
            status: 200,
            proxy_config: api_rule(),
            note: String::new(),
            json_truncated: false,
        }
    }

    async fn next_batch(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> (Vec<Message>, u64) {
        loop {
            match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
                Ok(Some(ServerEvent::ReqResJson { messages, ack_id, .. })) => return (messages, ack_id),
                Ok(Some(_)) => continue,
                other => panic!("no batch: {:?}", other.is_ok()),
            }
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_viewer() {
        let bus = MessageBus::new(config());
        let (id, mut rx) = bus.subscribe(vec![api_rule()]);
        bus.publish(&message(1, Body::Raw("done".into())));

        let (messages, ack_id) = next_batch(&mut rx).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sequence_number, 1);
        bus.ack(id, ack_id);
    }

    #[tokio::test]
    async fn test_one_batch_outstanding_until_ack() {
        let bus = MessageBus::new(config());
        let (id, mut rx) = bus.subscribe(vec![api_rule()]);

        bus.publish(&message(1, Body::Raw("a".into())));
        let (_, ack_id) = next_batch(&mut rx).await;

        bus.publish(&message(2, Body::Raw("b".into())));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err(), "second batch sent before ack");
        assert_eq!(bus.queued(id), 1);

        bus.ack(id, ack_id);
        let (messages, _) = next_batch(&mut rx).await;
        assert_eq!(messages[0].sequence_number, 2);
    }

    #[tokio::test]
    async fn test_completion_replaces_queued_request() {
        let bus = MessageBus::new(config());
        let (id, mut rx) = bus.subscribe(vec![api_rule()]);

        bus.publish(&message(1, Body::Raw("first".into())));
        let (_, ack_id) = next_batch(&mut rx).await;

        bus.publish(&message(2, Body::NoResponse));
        bus.publish(&message(2, Body::Raw("complete".into())));
        bus.publish(&message(2, Body::NoResponse));
        assert_eq!(bus.queued(id), 1);

        bus.ack(id, ack_id);
        let (messages, _) = next_batch(&mut rx).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].response_body, Body::Raw("complete".into()));
    }

    #[tokio::test]
    async fn test_full_queue_drops_oldest() {
        let mut cfg = config();
        cfg.max_pending = 2;
        let bus = MessageBus::new(cfg);
        let (id, mut rx) = bus.subscribe(vec![api_rule()]);

        bus.publish(&message(1, Body::Raw("a".into())));
        let _ = next_batch(&mut rx).await;

        for seq in 2..=5 {
            bus.publish(&message(seq, Body::Raw("x".into())));
        }
        assert_eq!(bus.queued(id), 2);
        assert_eq!(bus.dropped(id), 2);
    }

    #[tokio::test]
    async fn test_non_recording_route_is_not_delivered() {
        let bus = MessageBus::new(config());
        let mut off = RouteRule::http("/api", "localhost", 9000);
        off.recording = false;
        let (id, _rx) = bus.subscribe(vec![off]);

        bus.publish(&message(1, Body::Raw("a".into())));
        assert_eq!(bus.queued(id), 0);
    }

    #[tokio::test]
    async fn test_undeclared_route_is_not_delivered() {
        let bus = MessageBus::new(config());
        let (id, mut rx) = bus.subscribe(vec![RouteRule::http("/other", "localhost", 9000)]);

        bus.publish(&message(1, Body::Raw("a".into())));
        assert_eq!(bus.queued(id), 0);

        let mut unmatched = message(2, Body::Raw("404".into()));
        unmatched.proxy_config = RouteRule::unmatched("/missing");
        bus.publish(&unmatched);
        let (messages, _) = next_batch(&mut rx).await;
        assert_eq!(messages[0].sequence_number, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_delay_throttles_unless_stopped() {
        let mut cfg = config();
        cfg.ack_delay_ms = 3000;
        let bus = MessageBus::new(cfg);
        let (id, mut rx) = bus.subscribe(vec![api_rule()]);

        bus.publish(&message(1, Body::Raw("a".into())));
        let (_, ack_id) = next_batch(&mut rx).await;
        bus.publish(&message(2, Body::Raw("b".into())));
        bus.ack(id, ack_id);

        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert!(rx.try_recv().is_err());
        tokio::time::sleep(Duration::from_millis(200)).await;
        let (messages, ack_id) = next_batch(&mut rx).await;
        assert_eq!(messages[0].sequence_number, 2);

        bus.set_stopped(id, true);
        bus.publish(&message(3, Body::Raw("c".into())));
        bus.ack(id, ack_id);
        let (messages, _) = next_batch(&mut rx).await;
        assert_eq!(messages[0].sequence_number, 3);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = MessageBus::new(config());
        let (id, _rx) = bus.subscribe(vec![api_rule()]);
        assert_eq!(bus.viewer_count(), 1);
        bus.unsubscribe(id);
        assert_eq!(bus.viewer_count(), 0);
        bus.publish(&message(1, Body::Raw("a".into())));
        assert_eq!(bus.queued(id), 0);
    }
}
