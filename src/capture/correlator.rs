//! Request/response correlation.
//!
//! # Responsibilities
//! - Assign the sequence number at request capture
//! - Track one CorrelationState per in-flight exchange
//! - Complete the Message in place when the response half resolves
//! - Turn failures into synthetic Messages of the same shape
//!
//! # Design Decisions
//! - The pending half is an owned guard; dropping it without completing
//!   (client went away) releases its state and counts a ClientAbort
//! - Completion allocates the response-order key from the same allocator
//! - The idle timeout is a `select`-style branch and is off unless configured

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::json;

use crate::capture::external::ExternalRecord;
use crate::capture::request::{capture_request_body, derive_endpoint, RequestCapture};
use crate::capture::response::ResponseCapture;
use crate::error::CaptureError;
use crate::message::{collect_headers, now_millis, Body, Headers, Message, SequenceAllocator};
use crate::observability::metrics;

/// Process-local record of one exchange awaiting its response.
#[derive(Debug, Clone)]
pub struct CorrelationState {
    pub url: String,
    pub started: Instant,
}

/// Outcome of awaiting the response half.
#[derive(Debug)]
pub enum Correlation {
    Complete {
        message: Message,
        response: ResponseCapture,
    },
    Failed {
        message: Message,
        error: CaptureError,
    },
}

impl Correlation {
    pub fn message(&self) -> &Message {
        match self {
            Correlation::Complete { message, .. } | Correlation::Failed { message, .. } => message,
        }
    }
}

/// Assembles Messages from request and response captures.
#[derive(Debug)]
pub struct MessageCorrelator {
    sequence: Arc<SequenceAllocator>,
    in_flight: Arc<DashMap<u64, CorrelationState>>,
    body_capture_limit: usize,
    timeout: Option<Duration>,
}

impl MessageCorrelator {
    pub fn new(
        sequence: Arc<SequenceAllocator>,
        body_capture_limit: usize,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            sequence,
            in_flight: Arc::new(DashMap::new()),
            body_capture_limit,
            timeout,
        }
    }

    /// Number of exchanges awaiting their response.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_pending(&self, sequence_number: u64) -> bool {
        self.in_flight.contains_key(&sequence_number)
    }

    /// Capture the request half: allocates the sequence number and builds the
    /// request-only Message.
    pub fn begin(&self, request: RequestCapture) -> PendingCapture {
        let message = self.request_message(&request);
        let sequence_number = message.sequence_number;
        let started = Instant::now();

        self.in_flight.insert(
            sequence_number,
            CorrelationState {
                url: message.url.clone(),
                started,
            },
        );
        metrics::set_in_flight(self.in_flight.len());
        tracing::debug!(sequence_number, url = %message.url, "Request captured");

        PendingCapture {
            message,
            started,
            in_flight: Arc::clone(&self.in_flight),
            settled: false,
        }
    }

    /// Await the response half and complete the Message.
    pub async fn correlate<F>(&self, mut pending: PendingCapture, upstream: F) -> Correlation
    where
        F: Future<Output = Result<ResponseCapture, CaptureError>>,
    {
        let seq = pending.message.sequence_number;
        let result = match self.timeout {
            Some(after) => match tokio::time::timeout(after, upstream).await {
                Ok(result) => result,
                Err(_) => Err(CaptureError::CorrelationTimeout {
                    sequence_number: seq,
                    after,
                }),
            },
            None => upstream.await,
        };

        let message = pending.settle(&self.in_flight);
        match result {
            Ok(response) => {
                let message = self.complete(message, pending.started, &response);
                Correlation::Complete { message, response }
            }
            Err(error) => {
                let message = self.fail(message, pending.started, &error);
                Correlation::Failed { message, error }
            }
        }
    }

    /// A synthetic error Message for a request that never reached upstream.
    pub fn reject(&self, request: RequestCapture, error: &CaptureError) -> Message {
        let message = self.request_message(&request);
        self.fail(message, Instant::now(), error)
    }

    /// Assign sequence numbers to an externally decoded record.
    pub fn record(&self, record: ExternalRecord) -> Message {
        let sequence_number = self.sequence.next();
        let message = record.into_message(sequence_number, self.sequence.next());
        metrics::record_capture(
            &message.protocol,
            message.status,
            Duration::from_millis(message.elapsed_time),
        );
        message
    }

    fn request_message(&self, request: &RequestCapture) -> Message {
        let sequence_number = self.sequence.next();
        let (request_body, truncated) =
            capture_request_body(&request.body, self.body_capture_limit);
        let endpoint = derive_endpoint(request.url_path(), &request_body);

        Message {
            sequence_number,
            sequence_number_res: sequence_number,
            timestamp: now_millis(),
            elapsed_time: 0,
            method: request.method.clone(),
            url: request.url.clone(),
            endpoint,
            protocol: request.rule.scheme().to_string() + ":",
            client_ip: request.client_ip.clone(),
            server_host: request.server_host.clone(),
            path: request.rule.path.clone(),
            request_headers: request.headers.clone(),
            request_body,
            response_headers: Headers::new(),
            response_body: Body::NoResponse,
            status: 0,
            proxy_config: request.rule.clone(),
            note: String::new(),
            json_truncated: truncated,
        }
    }

    fn complete(&self, mut message: Message, started: Instant, response: &ResponseCapture) -> Message {
        let (body, truncated) = response.captured_body(self.body_capture_limit);
        let elapsed = started.elapsed();

        message.sequence_number_res = self.sequence.next();
        message.elapsed_time = elapsed.as_millis() as u64;
        message.status = response.status;
        message.response_headers = collect_headers(&response.headers);
        message.response_body = body;
        message.json_truncated |= truncated;

        metrics::record_capture(&message.protocol, message.status, elapsed);
        tracing::debug!(
            sequence_number = message.sequence_number,
            status = message.status,
            elapsed_ms = message.elapsed_time,
            "Response captured"
        );
        message
    }

    fn fail(&self, mut message: Message, started: Instant, error: &CaptureError) -> Message {
        let elapsed = started.elapsed();

        message.sequence_number_res = self.sequence.next();
        message.elapsed_time = elapsed.as_millis() as u64;
        message.status = error.status();
        message.response_body = Body::Json(json!({ "error": error.to_string() }));

        metrics::record_capture(&message.protocol, message.status, elapsed);
        tracing::warn!(
            sequence_number = message.sequence_number,
            url = %message.url,
            error = %error,
            "Capture failed"
        );
        message
    }
}

/// The request half of an exchange awaiting completion.
///
/// Dropping it before [`MessageCorrelator::correlate`] settles it is treated
/// as a client abort: the correlation state is released and nothing is shown.
#[derive(Debug)]
pub struct PendingCapture {
    message: Message,
    started: Instant,
    in_flight: Arc<DashMap<u64, CorrelationState>>,
    settled: bool,
}

impl PendingCapture {
    /// The request-only Message.
    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn sequence_number(&self) -> u64 {
        self.message.sequence_number
    }

    fn settle(&mut self, in_flight: &DashMap<u64, CorrelationState>) -> Message {
        self.settled = true;
        in_flight.remove(&self.message.sequence_number);
        metrics::set_in_flight(in_flight.len());
        self.message.clone()
    }
}

impl Drop for PendingCapture {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.in_flight.remove(&self.message.sequence_number);
        metrics::set_in_flight(self.in_flight.len());
        metrics::record_client_abort();
        let error = CaptureError::ClientAbort {
            sequence_number: self.message.sequence_number,
        };
        tracing::debug!(url = %self.message.url, "{}", error);
    }
}
