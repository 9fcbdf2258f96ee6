//! The suspension point between capture completion and the client response.
//!
//! # States
//! ```text
//! PASS_THROUGH ── message ready ──▶ no match ──▶ PASS_THROUGH
//!                                  match    ──▶ OFFERED ──approve──▶ APPROVED
//!                                                       ──timeout──▶ TIMED_OUT
//! ```

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::json;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::breakpoint::store::BreakpointStore;
use crate::bus::{MessageBus, ServerEvent};
use crate::error::CaptureError;
use crate::message::{Body, Message};
use crate::observability::metrics;

/// What the gate did with a completed Message.
#[derive(Debug)]
pub enum GateDecision {
    /// No enabled breakpoint matched.
    PassThrough(Message),
    /// An operator released the Message; `edited` when the body was replaced.
    Approved { message: Message, edited: bool },
    /// Nobody released it within the configured timeout. The Message has
    /// become an error Message carrying `error`, and the client receives
    /// that error instead of the held response.
    TimedOut { message: Message, error: CaptureError },
}

impl GateDecision {
    pub fn into_message(self) -> Message {
        match self {
            GateDecision::PassThrough(message)
            | GateDecision::Approved { message, .. }
            | GateDecision::TimedOut { message, .. } => message,
        }
    }
}

#[derive(Debug)]
struct Waiter {
    message: Message,
    breakpoint: Uuid,
    release: oneshot::Sender<Option<Body>>,
}

/// Holds Messages that match an enabled breakpoint until approved.
///
/// Each held Message is keyed by its own sequence number, so a hold only
/// blocks its own request.
#[derive(Debug)]
pub struct BreakpointGate {
    breakpoints: Arc<BreakpointStore>,
    bus: Arc<MessageBus>,
    waiters: DashMap<u64, Waiter>,
    timeout: Option<Duration>,
}

impl BreakpointGate {
    pub fn new(breakpoints: Arc<BreakpointStore>, bus: Arc<MessageBus>, timeout: Option<Duration>) -> Self {
        Self {
            breakpoints,
            bus,
            waiters: DashMap::new(),
            timeout,
        }
    }

    pub fn breakpoints(&self) -> &Arc<BreakpointStore> {
        &self.breakpoints
    }

    /// Offer a completed Message. Resolves immediately unless a breakpoint
    /// matches, in which case it waits for [`approve`](Self::approve).
    pub async fn offer(&self, mut message: Message) -> GateDecision {
        let Some(breakpoint) = self.breakpoints.first_match(&message) else {
            return GateDecision::PassThrough(message);
        };

        let seq = message.sequence_number;
        let (release, released) = oneshot::channel();
        self.waiters.insert(
            seq,
            Waiter {
                message: message.clone(),
                breakpoint,
                release,
            },
        );
        let _guard = WaitGuard {
            waiters: &self.waiters,
            seq,
        };

        metrics::record_breakpoint("held");
        tracing::info!(sequence_number = seq, breakpoint = %breakpoint, url = %message.url, "Message held at breakpoint");
        self.bus.broadcast(ServerEvent::Breakpoint {
            message: message.clone(),
        });

        let outcome = match self.timeout {
            Some(after) => tokio::time::timeout(after, released).await.ok(),
            None => Some(released.await),
        };

        match outcome {
            Some(Ok(Some(body))) => {
                metrics::record_breakpoint("edited");
                message.response_body = body;
                GateDecision::Approved {
                    message,
                    edited: true,
                }
            }
            Some(Ok(None)) | Some(Err(_)) => {
                metrics::record_breakpoint("approved");
                GateDecision::Approved {
                    message,
                    edited: false,
                }
            }
            None => {
                let error = CaptureError::BreakpointTimeout {
                    sequence_number: seq,
                    // `outcome` is only None when a timeout was configured.
                    after: self.timeout.unwrap_or_default(),
                };
                metrics::record_breakpoint("timeout");
                tracing::warn!(sequence_number = seq, error = %error, "Breakpoint released by timeout");
                if !message.note.is_empty() {
                    message.note.push('\n');
                }
                message.note.push_str(&error.to_string());
                message.status = error.status();
                message.response_body = Body::Json(json!({ "error": error.to_string() }));
                GateDecision::TimedOut { message, error }
            }
        }
    }

    /// Release a held Message, optionally replacing its response body.
    /// Disarms the breakpoint that held it. Returns false if nothing with
    /// that sequence number is held.
    pub fn approve(&self, sequence_number: u64, response_body: Option<Body>) -> bool {
        let Some((_, waiter)) = self.waiters.remove(&sequence_number) else {
            return false;
        };
        if self.breakpoints.disarm(waiter.breakpoint) {
            self.bus.broadcast(ServerEvent::Breakpoints {
                breakpoints: self.breakpoints.list(),
            });
        }
        tracing::info!(sequence_number, edited = response_body.is_some(), "Breakpoint approved");
        let _ = waiter.release.send(response_body);
        true
    }

    /// Messages currently held, oldest first.
    pub fn pending(&self) -> Vec<Message> {
        let mut held: Vec<Message> = self.waiters.iter().map(|w| w.message.clone()).collect();
        held.sort_by_key(|m| m.sequence_number);
        held
    }

    pub fn is_held(&self, sequence_number: u64) -> bool {
        self.waiters.contains_key(&sequence_number)
    }
}

/// Removes the waiter when the offering request goes away.
struct WaitGuard<'a> {
    waiters: &'a DashMap<u64, Waiter>,
    seq: u64,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.waiters.remove(&self.seq);
    }
}
