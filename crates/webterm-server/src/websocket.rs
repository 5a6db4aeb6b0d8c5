//! WebSocket connection handling.
//!
//! Each connection is one client. Requests arrive as JSON text frames, are
//! dispatched to the coordinator on the blocking pool, and answered with the
//! request's id. Unsolicited updates share the same outgoing channel.

use crate::state::AppState;
use anyhow::Result;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use webterm_core::{SessionCoordinator, Terminal};
use webterm_types::{pack_response, unpack_request, ClientId, Request, Response, ResponseEnvelope};

/// Largest request frame accepted (64KB, generous for pasted input).
const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// How long queued replies may take to flush once the client is done.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of one request frame.
#[derive(Debug, PartialEq, Eq)]
pub struct Reply {
    pub envelope: ResponseEnvelope,
    /// The client asked to leave; close after sending.
    pub close: bool,
}

/// Decode one frame, run it, and build the reply. Malformed frames are
/// answered with an error carrying whatever id could be read.
pub fn handle_text<T: Terminal + 'static>(
    coordinator: &SessionCoordinator<T>,
    client: ClientId,
    text: &str,
) -> Reply {
    let envelope = match unpack_request(text) {
        Ok(envelope) => envelope,
        Err(rejected) => {
            debug!(target: "webterm::ws", "Rejected frame from {}: {}", client, rejected.error);
            return Reply {
                envelope: ResponseEnvelope {
                    id: rejected.id,
                    response: Response::error(rejected.error.to_string()),
                },
                close: false,
            };
        }
    };

    let close = envelope.request == Request::Leave;
    let response = coordinator.dispatch(client, envelope.request);
    Reply {
        envelope: ResponseEnvelope::reply(envelope.id, response),
        close,
    }
}

pub async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) -> Result<()> {
    let client = ClientId::new();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<ResponseEnvelope>();

    state.coordinator.connect(client, Box::new(outgoing_tx.clone()));
    info!(target: "webterm::ws", "Client {} connected as {}", client, client.guest_name());

    // Replies and pushed updates go out in the order they were queued. The task
    // ends once every sender is gone, after which the socket is closed.
    let mut send_task = tokio::spawn(async move {
        while let Some(envelope) = outgoing_rx.recv().await {
            let json = pack_response(&envelope);
            if let Err(e) = ws_tx.send(Message::Text(json.into())).await {
                debug!(target: "webterm::ws", "WebSocket send failed for {}: {}", client, e);
                return;
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    let coordinator = state.coordinator.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                Message::Text(text) => {
                    let text = text.as_str().to_owned();
                    if text.len() > MAX_MESSAGE_SIZE {
                        warn!(
                            target: "webterm::ws",
                            "Message too large ({} bytes) from {}, max {} bytes",
                            text.len(),
                            client,
                            MAX_MESSAGE_SIZE
                        );
                        let _ = outgoing_tx.send(ResponseEnvelope::broadcast(Response::error(
                            "Message too large.",
                        )));
                        continue;
                    }
                    trace!(target: "webterm::ws", "<- {}: {}", client, text);

                    let coordinator = coordinator.clone();
                    let reply = match tokio::task::spawn_blocking(move || {
                        handle_text(&coordinator, client, &text)
                    })
                    .await
                    {
                        Ok(reply) => reply,
                        Err(e) => {
                            warn!(target: "webterm::ws", "Request handler for {} failed: {}", client, e);
                            break;
                        }
                    };

                    let close = reply.close;
                    if outgoing_tx.send(reply.envelope).is_err() || close {
                        break;
                    }
                }
                Message::Close(_) => break,
                Message::Binary(data) => {
                    debug!(target: "webterm::ws", "Ignoring {} byte binary frame from {}", data.len(), client);
                }
                _ => {}
            }
        }
    });

    let send_finished = tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            true
        }
        _ = &mut recv_task => false,
    };

    let coordinator = state.coordinator.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || coordinator.disconnect(client)).await {
        warn!(target: "webterm::ws", "Disconnect of {} failed: {}", client, e);
    }

    if !send_finished && tokio::time::timeout(FLUSH_TIMEOUT, &mut send_task).await.is_err() {
        debug!(target: "webterm::ws", "Gave up flushing replies to {}", client);
        send_task.abort();
    }

    info!(target: "webterm::ws", "Client {} disconnected", client);
    Ok(())
}
