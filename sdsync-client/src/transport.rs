//! Session channel transport
//!
//! A [`Connector`] opens one session channel and hands back a pair of queues.
//! Dropping the [`Connection`] closes the channel; the far end sees a normal
//! socket close and releases the listener's membership.

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use sdsync_common::{ClientMessage, ServerMessage};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use crate::error::ClientResult;

/// Queue capacity on each side of a connection
const CHANNEL_CAPACITY: usize = 64;

/// One open session channel
///
/// `inbound` yields `None` once the hub closes the channel or the socket fails.
pub struct Connection {
    pub outbound: mpsc::Sender<ClientMessage>,
    pub inbound: mpsc::Receiver<ServerMessage>,
}

impl Connection {
    /// In-process channel: the client side plus its far end
    pub fn pair(capacity: usize) -> (Connection, FarEnd) {
        let (out_tx, out_rx) = mpsc::channel(capacity.max(1));
        let (in_tx, in_rx) = mpsc::channel(capacity.max(1));
        (
            Connection {
                outbound: out_tx,
                inbound: in_rx,
            },
            FarEnd {
                from_client: out_rx,
                to_client: in_tx,
            },
        )
    }
}

/// Hub side of an in-process [`Connection`]
pub struct FarEnd {
    pub from_client: mpsc::Receiver<ClientMessage>,
    pub to_client: mpsc::Sender<ServerMessage>,
}

pub type ConnectFuture = BoxFuture<'static, ClientResult<Connection>>;

/// Opens session channels
///
/// The returned future may be dropped before it completes; that cancels the attempt.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, session_id: &str) -> ConnectFuture;
}

/// WebSocket connector for `<base>/ws/session/<id>`
#[derive(Debug, Clone)]
pub struct WsConnector {
    base_url: String,
}

impl WsConnector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    pub fn session_url(&self, session_id: &str) -> String {
        format!(
            "{}/ws/session/{}",
            self.base_url.trim_end_matches('/'),
            session_id
        )
    }
}

impl Connector for WsConnector {
    fn connect(&self, session_id: &str) -> ConnectFuture {
        let url = self.session_url(session_id);
        Box::pin(async move {
            let (socket, _) = connect_async(url.as_str()).await?;
            debug!("Connected to {}", url);
            let (mut sink, mut stream) = socket.split();
            let (connection, far) = Connection::pair(CHANNEL_CAPACITY);
            let FarEnd {
                mut from_client,
                to_client,
            } = far;

            // Writer: ends when the Connection is dropped, closing the socket
            tokio::spawn(async move {
                while let Some(msg) = from_client.recv().await {
                    let text = match msg.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode {}: {}", msg.kind(), e);
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        debug!("Socket write failed: {}", e);
                        break;
                    }
                }
                let _ = sink.close().await;
            });

            // Reader: ends on close or error, which the owner sees as `None`
            tokio::spawn(async move {
                while let Some(frame) = stream.next().await {
                    match frame {
                        Ok(Message::Text(text)) => match ServerMessage::from_json(&text) {
                            Ok(msg) => {
                                if to_client.send(msg).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!("Ignoring frame from hub: {}", e),
                        },
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            debug!("Socket read failed: {}", e);
                            break;
                        }
                    }
                }
            });

            Ok(connection)
        })
    }
}
