//! Per-viewer delivery loop.
//!
//! # Flow Control
//! ```text
//! pending queue ──take ≤ max_batch──▶ reqResJson{ackId} ──▶ viewer
//!       ▲                                                     │
//!       │            wait for ack (≤ ack_timeout)  ◀──────────┘
//!       │            sleep ack_delay unless stopped
//!       └──────────── next batch
//! ```
//! Exactly one batch is outstanding per viewer, so memory per viewer is
//! bounded by `max_pending` queued Messages plus one batch in flight.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};

use crate::bus::events::ServerEvent;
use crate::bus::subscription::{ViewerId, ViewerSubscription};
use crate::config::BusConfig;
use crate::message::Message;
use crate::observability::metrics;

/// Shared state of one connected viewer.
#[derive(Debug)]
pub(crate) struct ViewerSlot {
    pub(crate) id: ViewerId,
    pub(crate) subscription: RwLock<ViewerSubscription>,
    pending: Mutex<VecDeque<Message>>,
    pub(crate) stopped: AtomicBool,
    pub(crate) dropped: AtomicU64,
    wake: Notify,
    pub(crate) events: mpsc::UnboundedSender<ServerEvent>,
    pub(crate) acks: mpsc::UnboundedSender<u64>,
}

impl ViewerSlot {
    pub(crate) fn new(
        id: ViewerId,
        declared: Vec<crate::routing::RouteRule>,
        events: mpsc::UnboundedSender<ServerEvent>,
        acks: mpsc::UnboundedSender<u64>,
    ) -> Self {
        Self {
            id,
            subscription: RwLock::new(ViewerSubscription::new(id, declared)),
            pending: Mutex::new(VecDeque::new()),
            stopped: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            wake: Notify::new(),
            events,
            acks,
        }
    }

    /// Queue a Message for delivery. A queued request-only Message is
    /// replaced by its completion; a full queue drops its oldest entry.
    pub(crate) fn enqueue(&self, message: Message, max_pending: usize) {
        let dropped = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            let seq = message.sequence_number;
            if let Some(existing) = pending.iter_mut().rev().find(|m| m.sequence_number == seq) {
                if !message.response_body.is_no_response() {
                    *existing = message;
                }
                0
            } else {
                pending.push_back(message);
                let mut dropped = 0;
                while pending.len() > max_pending {
                    pending.pop_front();
                    dropped += 1;
                }
                dropped
            }
        };
        if dropped > 0 {
            self.dropped.fetch_add(dropped, Ordering::Relaxed);
            metrics::record_bus_dropped(dropped);
            tracing::warn!(viewer = self.id, dropped, "Viewer queue full, oldest Messages dropped");
        }
        self.wake.notify_one();
    }

    pub(crate) fn queued(&self) -> usize {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn take_batch(&self, max_batch: usize) -> Vec<Message> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let n = pending.len().min(max_batch);
        pending.drain(..n).collect()
    }
}

/// Deliver queued Messages to one viewer until it disconnects.
pub(crate) async fn deliver(
    slot: Arc<ViewerSlot>,
    mut acks: mpsc::UnboundedReceiver<u64>,
    config: BusConfig,
) {
    let ack_timeout = Duration::from_secs(config.ack_timeout_secs);
    let ack_delay = Duration::from_millis(config.ack_delay_ms);
    let mut next_ack_id: u64 = 0;

    loop {
        let batch = loop {
            let batch = slot.take_batch(config.max_batch);
            if !batch.is_empty() {
                break batch;
            }
            slot.wake.notified().await;
        };

        next_ack_id += 1;
        let ack_id = next_ack_id;
        let count = batch.len();
        let event = ServerEvent::ReqResJson {
            messages: batch,
            queued_count: slot.queued(),
            ack_id,
        };
        if slot.events.send(event).is_err() {
            break;
        }
        metrics::record_bus_batch();
        tracing::trace!(viewer = slot.id, ack_id, count, "Batch pushed");

        match tokio::time::timeout(ack_timeout, wait_for_ack(&mut acks, ack_id)).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(_) => {
                tracing::warn!(viewer = slot.id, ack_id, "Viewer did not acknowledge batch, continuing");
            }
        }

        if !slot.stopped.load(Ordering::Relaxed) && !ack_delay.is_zero() {
            tokio::time::sleep(ack_delay).await;
        }
    }
    tracing::debug!(viewer = slot.id, "Delivery loop finished");
}

/// Returns false once the viewer's ack channel is closed.
async fn wait_for_ack(acks: &mut mpsc::UnboundedReceiver<u64>, ack_id: u64) -> bool {
    while let Some(id) = acks.recv().await {
        if id >= ack_id {
            return true;
        }
    }
    false
}
