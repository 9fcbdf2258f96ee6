//! Viewer push channel over WebSocket.
//!
//! # Responsibilities
//! - Subscribe each connection to the bus
//! - Send the effective route set, the breakpoint list and any held Messages
//! - Apply viewer events: route replace, acks, stop/resume, breakpoint edits

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};

use crate::bus::{ClientEvent, ServerEvent, ViewerId};
use crate::http::server::AppState;

pub async fn viewer_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_viewer(socket, state))
}

async fn handle_viewer(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (viewer, mut events) = state.bus.subscribe(Vec::new());

    state.bus.send_to(
        viewer,
        ServerEvent::ProxyConfig {
            rules: state.routes.snapshot().to_vec(),
        },
    );
    state.bus.send_to(
        viewer,
        ServerEvent::Breakpoints {
            breakpoints: state.breakpoints.list(),
        },
    );
    for message in state.gate.pending() {
        state.bus.send_to(viewer, ServerEvent::Breakpoint { message });
    }

    let writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(viewer, error = %e, "Failed to encode viewer event");
                    continue;
                }
            };
            if sink.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<ClientEvent>(text.as_str()) {
                Ok(event) => handle_event(&state, viewer, event),
                Err(e) => {
                    tracing::warn!(viewer, error = %e, "Invalid viewer event");
                    state.bus.send_to(
                        viewer,
                        ServerEvent::Error {
                            message: format!("Invalid event: {e}"),
                        },
                    );
                }
            },
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(viewer, error = %e, "Viewer connection error");
                break;
            }
        }
    }

    state.bus.unsubscribe(viewer);
    writer.abort();
}

fn handle_event(state: &AppState, viewer: ViewerId, event: ClientEvent) {
    match event {
        ClientEvent::ProxyConfig { rules } => match state.replace_routes(rules.clone()) {
            Ok(()) => state.bus.declare(viewer, rules),
            Err(errors) => {
                let message = errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
                tracing::warn!(viewer, error = %message, "Viewer route set rejected");
                state.bus.send_to(viewer, ServerEvent::Error { message });
            }
        },
        ClientEvent::Ack { ack_id } => state.bus.ack(viewer, ack_id),
        ClientEvent::Stopped { stopped } => state.bus.set_stopped(viewer, stopped),
        ClientEvent::Resume {
            sequence_number,
            response_body,
        } => {
            if !state.gate.approve(sequence_number, response_body) {
                state.bus.send_to(
                    viewer,
                    ServerEvent::Error {
                        message: format!("No Message with sequence number {sequence_number} is held"),
                    },
                );
            }
        }
        ClientEvent::Breakpoints { breakpoints } => {
            if let Err(e) = state.replace_breakpoints(breakpoints) {
                tracing::warn!(viewer, error = %e, "Viewer breakpoint list rejected");
                state.bus.send_to(viewer, ServerEvent::Error { message: e.to_string() });
            }
        }
    }
}
