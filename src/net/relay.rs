//! Raw TCP capture relay for non-HTTP routes.
//!
//! # Responsibilities
//! - Listen on each relayed rule's port selector
//! - Relay bytes between the client and `hostname:port`
//! - Record every client chunk and the reply that follows it as one Message
//!
//! # Design Decisions
//! - Bytes stream through as they arrive, so relayed traffic is never held
//!   at a breakpoint
//! - A relay is restarted only when its rule changes

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::bus::MessageBus;
use crate::capture::request::truncated_text;
use crate::capture::{ExternalRecord, MessageCorrelator};
use crate::message::{now_millis, Body, Headers};
use crate::routing::RouteRule;

const READ_BUFFER: usize = 16 * 1024;

struct Relay {
    rule: RouteRule,
    task: JoinHandle<()>,
}

/// Runs one relay per relayed rule.
pub struct RelaySupervisor {
    correlator: Arc<MessageCorrelator>,
    bus: Arc<MessageBus>,
    bind_host: String,
    body_capture_limit: usize,
    relays: Mutex<HashMap<u16, Relay>>,
}

impl RelaySupervisor {
    pub fn new(
        correlator: Arc<MessageCorrelator>,
        bus: Arc<MessageBus>,
        bind_host: impl Into<String>,
        body_capture_limit: usize,
    ) -> Self {
        Self {
            correlator,
            bus,
            bind_host: bind_host.into(),
            body_capture_limit,
            relays: Mutex::new(HashMap::new()),
        }
    }

    /// Bring running relays in line with `rules`. Must run inside a Tokio
    /// runtime.
    pub fn sync(&self, rules: &[RouteRule]) {
        let mut relays = self.relays.lock().unwrap_or_else(PoisonError::into_inner);
        let wanted: HashMap<u16, &RouteRule> = rules
            .iter()
            .filter(|r| r.protocol.is_relayed())
            .filter_map(|r| r.listen_port().map(|port| (port, r)))
            .collect();

        relays.retain(|port, relay| {
            let keep = wanted.get(port).is_some_and(|rule| **rule == relay.rule);
            if !keep {
                relay.task.abort();
                tracing::info!(port, protocol = %relay.rule.protocol, "Relay stopped");
            }
            keep
        });

        for (port, rule) in wanted {
            if relays.contains_key(&port) {
                continue;
            }
            let context = RelayContext {
                rule: rule.clone(),
                correlator: Arc::clone(&self.correlator),
                bus: Arc::clone(&self.bus),
                body_capture_limit: self.body_capture_limit,
            };
            let task = tokio::spawn(listen(format!("{}:{}", self.bind_host, port), context));
            relays.insert(
                port,
                Relay {
                    rule: rule.clone(),
                    task,
                },
            );
        }
    }

    /// Listen ports with a running relay.
    pub fn ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self
            .relays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ports.sort_unstable();
        ports
    }

    pub fn stop_all(&self) {
        let mut relays = self.relays.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, relay) in relays.drain() {
            relay.task.abort();
        }
    }
}

impl Drop for RelaySupervisor {
    fn drop(&mut self) {
        self.stop_all();
    }
}

impl std::fmt::Debug for RelaySupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySupervisor")
            .field("bind_host", &self.bind_host)
            .field("ports", &self.ports())
            .finish()
    }
}

#[derive(Clone)]
struct RelayContext {
    rule: RouteRule,
    correlator: Arc<MessageCorrelator>,
    bus: Arc<MessageBus>,
    body_capture_limit: usize,
}

async fn listen(address: String, context: RelayContext) {
    let listener = match TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(address = %address, protocol = %context.rule.protocol, error = %e, "Failed to bind relay");
            return;
        }
    };
    tracing::info!(
        address = %address,
        protocol = %context.rule.protocol,
        target = %format!("{}:{}", context.rule.hostname, context.rule.port),
        "Relay listening"
    );

    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                let context = context.clone();
                tokio::spawn(async move {
                    if let Err(e) = relay_connection(socket, peer, &context).await {
                        tracing::debug!(peer = %peer, error = %e, "Relay connection ended");
                    }
                });
            }
            Err(e) => tracing::warn!(error = %e, "Relay accept failed"),
        }
    }
}

/// One client chunk and everything the server sent back before the next one.
struct Exchange {
    request: Vec<u8>,
    response: Vec<u8>,
    timestamp: u64,
    started: Instant,
}

impl Exchange {
    fn new() -> Self {
        Self {
            request: Vec::new(),
            response: Vec::new(),
            timestamp: now_millis(),
            started: Instant::now(),
        }
    }
}

async fn relay_connection(
    mut client: TcpStream,
    peer: SocketAddr,
    context: &RelayContext,
) -> std::io::Result<()> {
    let target = format!("{}:{}", context.rule.hostname, context.rule.port);
    let mut upstream = TcpStream::connect(&target).await?;
    let (mut client_read, mut client_write) = client.split();
    let (mut upstream_read, mut upstream_write) = upstream.split();

    let mut client_buf = vec![0u8; READ_BUFFER];
    let mut upstream_buf = vec![0u8; READ_BUFFER];
    let mut current: Option<Exchange> = None;
    let mut client_open = true;

    let result = loop {
        tokio::select! {
            read = client_read.read(&mut client_buf), if client_open => {
                let n = match read {
                    Ok(0) => {
                        // Half-close: the upstream may still be replying.
                        client_open = false;
                        if let Err(e) = upstream_write.shutdown().await {
                            break Err(e);
                        }
                        continue;
                    }
                    Ok(n) => n,
                    Err(e) => break Err(e),
                };
                if let Err(e) = upstream_write.write_all(&client_buf[..n]).await {
                    break Err(e);
                }
                let exchange = match current.take() {
                    // Still the same request, split across reads.
                    Some(exchange) if exchange.response.is_empty() => exchange,
                    finished => {
                        if let Some(done) = finished {
                            record(context, peer, done);
                        }
                        Exchange::new()
                    }
                };
                let exchange = current.insert(exchange);
                exchange.request.extend_from_slice(&client_buf[..n]);
            }
            read = upstream_read.read(&mut upstream_buf) => {
                let n = match read {
                    Ok(0) => break Ok(()),
                    Ok(n) => n,
                    Err(e) => break Err(e),
                };
                if let Err(e) = client_write.write_all(&upstream_buf[..n]).await {
                    break Err(e);
                }
                current
                    .get_or_insert_with(Exchange::new)
                    .response
                    .extend_from_slice(&upstream_buf[..n]);
            }
        }
    };

    if let Some(done) = current.take() {
        record(context, peer, done);
    }
    result
}

fn record(context: &RelayContext, peer: SocketAddr, exchange: Exchange) {
    let (request, request_truncated) = truncated_text(&exchange.request, context.body_capture_limit);
    let (response, response_truncated) = truncated_text(&exchange.response, context.body_capture_limit);
    let url = request.lines().next().unwrap_or_default().chars().take(200).collect();
    let rule = &context.rule;

    let record = ExternalRecord {
        protocol: rule.protocol,
        timestamp: Some(exchange.timestamp),
        elapsed_time: exchange.started.elapsed().as_millis() as u64,
        method: rule.protocol.as_str().trim_end_matches(':').to_ascii_uppercase(),
        url,
        endpoint: String::new(),
        client_ip: peer.ip().to_string(),
        server_host: format!("{}:{}", rule.hostname, rule.port),
        path: rule.path.clone(),
        request_headers: Headers::new(),
        request_body: Body::Raw(request),
        response_headers: Headers::new(),
        response_body: Body::Raw(response),
        status: 0,
        proxy_config: Some(rule.clone()),
        note: String::new(),
    };
    let mut message = context.correlator.record(record);
    message.json_truncated = request_truncated || response_truncated;
    context.bus.publish(&message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusConfig;
    use crate::message::SequenceAllocator;
    use crate::routing::Protocol;

    fn supervisor() -> (RelaySupervisor, Arc<MessageBus>) {
        let bus = Arc::new(MessageBus::new(BusConfig::default()));
        let correlator = Arc::new(MessageCorrelator::new(Arc::new(SequenceAllocator::new()), 1024, None));
        (RelaySupervisor::new(correlator, Arc::clone(&bus), "127.0.0.1", 1024), bus)
    }

    fn relayed(listen: u16, target: u16) -> RouteRule {
        let mut rule = RouteRule::http(listen.to_string(), "127.0.0.1", target);
        rule.protocol = Protocol::Tcp;
        rule
    }

    #[tokio::test]
    async fn test_sync_follows_rule_set() {
        let (relays, _bus) = supervisor();
        relays.sync(&[relayed(0, 1), RouteRule::http("/", "web", 80)]);
        // Port 0 is not a valid selector.
        assert!(relays.ports().is_empty());

        relays.sync(&[relayed(38401, 6379), relayed(38402, 6379)]);
        assert_eq!(relays.ports(), vec![38401, 38402]);

        relays.sync(&[relayed(38402, 6379)]);
        assert_eq!(relays.ports(), vec![38402]);
        relays.stop_all();
        assert!(relays.ports().is_empty());
    }

    #[tokio::test]
    async fn test_exchange_is_recorded() {
        let echo = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let echo_port = echo.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = echo.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(b"+PONG\r\n").await.unwrap();
            assert_eq!(&buf[..n], b"PING\r\n");
        });

        let (relays, bus) = supervisor();
        let rule = relayed(38411, echo_port);
        let (_viewer, mut events) = bus.subscribe(vec![rule.clone()]);
        relays.sync(std::slice::from_ref(&rule));
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let mut client = TcpStream::connect("127.0.0.1:38411").await.unwrap();
        client.write_all(b"PING\r\n").await.unwrap();
        let mut reply = [0u8; 7];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"+PONG\r\n");
        drop(client);

        let event = tokio::time::timeout(std::time::Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        let crate::bus::ServerEvent::ReqResJson { messages, .. } = event else {
            panic!("expected a batch");
        };
        assert_eq!(messages[0].protocol, "tcp:");
        assert_eq!(messages[0].method, "TCP");
        assert_eq!(messages[0].request_body, Body::Raw("PING\r\n".into()));
        assert_eq!(messages[0].response_body, Body::Raw("+PONG\r\n".into()));
        assert_eq!(messages[0].status, 0);
    }

    #[tokio::test]
    async fn test_reply_after_client_half_close_is_recorded() {
        let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_port = upstream.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = upstream.accept().await.unwrap();
            let mut request = Vec::new();
            socket.read_to_end(&mut request).await.unwrap();
            socket.write_all(b"+OK\r\n").await.unwrap();
        });

        let (relays, bus) = supervisor();
        let rule = relayed(38412, upstream_port);
        let (_viewer, mut events) = bus.subscribe(vec![rule.clone()]);
        relays.sync(std::slice::from_ref(&rule));
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let mut client = TcpStream::connect("127.0.0.1:38412").await.unwrap();
        client.write_all(b"QUIT\r\n").await.unwrap();
        client.shutdown().await.unwrap();
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"+OK\r\n");

        let event = tokio::time::timeout(std::time::Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        let crate::bus::ServerEvent::ReqResJson { messages, .. } = event else {
            panic!("expected a batch");
        };
        assert_eq!(messages[0].request_body, Body::Raw("QUIT\r\n".into()));
        assert_eq!(messages[0].response_body, Body::Raw("+OK\r\n".into()));
    }
}
