//! WebSocket session channel
//!
//! Pumps frames between one socket and its [`ConnectionAdapter`]: inbound text
//! frames go to the adapter, the adapter's outbound queue is written to the
//! socket in order.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::adapter::{AdapterState, ConnectionAdapter, Flow};
use crate::AppState;

/// GET /ws/session/:session_id (also mounted under /api)
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, state))
}

async fn handle_socket(socket: WebSocket, session_id: String, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (mut adapter, mut outbound) = ConnectionAdapter::open(
        state.hub.clone(),
        session_id,
        state.config.send_queue_capacity,
    );
    debug!(
        "WebSocket {} connected to session {}",
        adapter.id(),
        adapter.session_id()
    );

    let join_deadline = tokio::time::sleep(state.config.join_timeout());
    tokio::pin!(join_deadline);
    // Once a close is requested only queued frames are flushed
    let mut closing = false;

    loop {
        tokio::select! {
            _ = &mut join_deadline, if adapter.state() == AdapterState::Connecting => {
                if adapter.on_join_timeout() == Flow::Close {
                    closing = true;
                }
            }
            inbound = receiver.next(), if !closing => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if adapter.on_text(&text).await == Flow::Close {
                            closing = true;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!("WebSocket {} receive error: {}", adapter.id(), e);
                        break;
                    }
                    // Ping/pong handled by axum, binary frames are not part of the protocol
                    Some(Ok(_)) => {}
                }
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    break;
                };
                let text = match frame.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("WebSocket {}: failed to encode {}: {}", adapter.id(), frame.kind(), e);
                        continue;
                    }
                };
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        }
    }

    adapter.on_close().await;
    let _ = sender.send(Message::Close(None)).await;
    debug!("WebSocket {} finished", adapter.id());
}
