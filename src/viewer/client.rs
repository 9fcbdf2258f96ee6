//! Push-channel client.
//!
//! Connects to `/_viewer/ws`, acknowledges every delivery batch as soon as it
//! is received and feeds it into an [`OrderedMessageQueue`].

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::bus::{ClientEvent, ServerEvent};
use crate::message::Body;
use crate::routing::RouteRule;
use crate::viewer::queue::{InsertReport, OrderedMessageQueue};

#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("Push channel error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Malformed push event: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Push channel closed")]
    Closed,
}

/// A connected viewer.
pub struct ViewerClient {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl ViewerClient {
    /// Connect to a push-channel URL such as `ws://localhost:8888/_viewer/ws`.
    pub async fn connect(url: &str) -> Result<Self, ViewerError> {
        let (socket, _response) = connect_async(url).await?;
        tracing::debug!(url, "Viewer connected");
        Ok(Self { socket })
    }

    pub async fn send(&mut self, event: &ClientEvent) -> Result<(), ViewerError> {
        let text = serde_json::to_string(event)?;
        self.socket.send(WsMessage::text(text)).await?;
        Ok(())
    }

    /// Declare the routes this viewer records (and replace the proxy's set).
    pub async fn declare(&mut self, rules: Vec<RouteRule>) -> Result<(), ViewerError> {
        self.send(&ClientEvent::ProxyConfig { rules }).await
    }

    pub async fn set_stopped(&mut self, stopped: bool) -> Result<(), ViewerError> {
        self.send(&ClientEvent::Stopped { stopped }).await
    }

    /// Release a held Message, optionally replacing its response body.
    pub async fn resume(&mut self, sequence_number: u64, response_body: Option<Body>) -> Result<(), ViewerError> {
        self.send(&ClientEvent::Resume {
            sequence_number,
            response_body,
        })
        .await
    }

    /// Next server event. Delivery batches are acknowledged before return.
    pub async fn next_event(&mut self) -> Result<ServerEvent, ViewerError> {
        loop {
            let frame = self.socket.next().await.ok_or(ViewerError::Closed)??;
            let event: ServerEvent = match frame {
                WsMessage::Text(text) => serde_json::from_str(text.as_str())?,
                WsMessage::Binary(bytes) => serde_json::from_slice(&bytes)?,
                WsMessage::Close(_) => return Err(ViewerError::Closed),
                _ => continue,
            };
            if let ServerEvent::ReqResJson { ack_id, .. } = &event {
                let ack_id = *ack_id;
                self.send(&ClientEvent::Ack { ack_id }).await?;
            }
            return Ok(event);
        }
    }

    /// Receive one event and apply it to `queue`. Returns the event and, for
    /// delivery batches, the merge report.
    pub async fn pump(
        &mut self,
        queue: &mut OrderedMessageQueue,
    ) -> Result<(ServerEvent, Option<InsertReport>), ViewerError> {
        let event = self.next_event().await?;
        let report = match &event {
            ServerEvent::ReqResJson { messages, .. } => Some(queue.insert_batch(messages.iter().cloned())),
            ServerEvent::Breakpoints { breakpoints } => {
                queue.set_breakpoints(breakpoints);
                None
            }
            _ => None,
        };
        Ok((event, report))
    }

    pub async fn close(mut self) -> Result<(), ViewerError> {
        self.socket.close(None).await?;
        Ok(())
    }
}
