//! Listener Connection Adapter
//!
//! One per connected socket. Decodes inbound frames into Hub calls and owns the
//! connection's membership state:
//!
//! ```text
//! Connecting --JOIN--> Joined --close--> Disconnected
//!     |                  \--SESSION_END (operator)--> Left
//!     \--JOIN failed / JOIN timeout / close--> Disconnected
//! ```
//!
//! Outbound frames travel through a bounded queue that the socket task drains in
//! order. Until JOIN succeeds the adapter holds the only sender; afterwards the
//! session holds it and the adapter keeps a weak handle for direct replies
//! (PONG, ERROR), so the queue closes as soon as the hub drops the member.

use std::sync::Arc;

use sdsync_common::ids::ConnectionId;
use sdsync_common::wire::{ClientMessage, JoinRequest, PongPayload, Role};
use sdsync_common::ServerMessage;
use tokio::sync::mpsc::{self, WeakSender};
use tracing::{debug, info, warn};

use crate::error::{HubError, HubResult};
use crate::hub::Hub;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Connecting,
    Joined,
    Left,
    Disconnected,
}

/// What the socket task should do after handling a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

enum Outbound {
    Owned(mpsc::Sender<ServerMessage>),
    Shared(WeakSender<ServerMessage>),
    Closed,
}

pub struct ConnectionAdapter {
    id: ConnectionId,
    hub: Arc<Hub>,
    session_id: String,
    role: Option<Role>,
    state: AdapterState,
    outbound: Outbound,
}

impl ConnectionAdapter {
    /// New adapter plus the receiving end of its outbound queue
    pub fn open(
        hub: Arc<Hub>,
        session_id: impl Into<String>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let adapter = Self {
            id: ConnectionId::new(),
            hub,
            session_id: session_id.into(),
            role: None,
            state: AdapterState::Connecting,
            outbound: Outbound::Owned(tx),
        };
        debug!("Connection {} opened for session {}", adapter.id, adapter.session_id);
        (adapter, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> AdapterState {
        self.state
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    fn sender(&self) -> Option<mpsc::Sender<ServerMessage>> {
        match &self.outbound {
            Outbound::Owned(tx) => Some(tx.clone()),
            Outbound::Shared(weak) => weak.upgrade(),
            Outbound::Closed => None,
        }
    }

    /// Queue a frame for this connection only
    fn reply(&self, msg: ServerMessage) {
        let Some(tx) = self.sender() else {
            debug!("Connection {}: {} dropped, queue closed", self.id, msg.kind());
            return;
        };
        if let Err(e) = tx.try_send(msg) {
            warn!("Connection {}: reply not queued: {}", self.id, e);
        }
    }

    fn reply_error(&self, err: &HubError) {
        debug!("Connection {}: {}", self.id, err);
        self.reply(err.to_frame());
    }

    /// Give the strong sender to the session and keep a weak handle
    fn hand_over(&mut self) {
        if let Outbound::Owned(tx) = &self.outbound {
            self.outbound = Outbound::Shared(tx.downgrade());
        }
    }

    /// Send any final frames already queued, then stop accepting more
    fn close_outbound(&mut self) {
        self.outbound = Outbound::Closed;
    }

    /// Decode and handle one text frame
    pub async fn on_text(&mut self, text: &str) -> Flow {
        match ClientMessage::from_json(text) {
            Ok(msg) => self.on_message(msg).await,
            Err(e) => {
                self.reply_error(&HubError::from(e));
                Flow::Continue
            }
        }
    }

    pub async fn on_message(&mut self, msg: ClientMessage) -> Flow {
        debug!("Connection {}: received {}", self.id, msg.kind());
        match msg {
            ClientMessage::Join(request) => self.on_join(request).await,
            ClientMessage::Ping(ping) => {
                self.reply(ServerMessage::Pong(PongPayload {
                    client_time: ping.client_time,
                    server_time: self.hub.now(),
                }));
                Flow::Continue
            }
            ClientMessage::GetState(_) => {
                match self.hub.state(&self.session_id).await {
                    Ok(snapshot) => self.reply(ServerMessage::StateSync(snapshot)),
                    Err(e) => self.reply_error(&e),
                }
                Flow::Continue
            }
            command => self.on_operator_command(command).await,
        }
    }

    async fn on_join(&mut self, request: JoinRequest) -> Flow {
        if self.state == AdapterState::Joined {
            if self.role == Some(request.role) && request.role == Role::Listener {
                // Re-JOIN from a joined listener just refreshes its snapshot
                if let Some(tx) = self.sender() {
                    if let Err(e) = self.hub.join(&self.session_id, self.id, tx).await {
                        self.reply_error(&e);
                    }
                }
            } else {
                debug!("Connection {}: duplicate JOIN ignored", self.id);
            }
            return Flow::Continue;
        }
        if self.state != AdapterState::Connecting {
            return Flow::Continue;
        }

        let Some(tx) = self.sender() else {
            self.state = AdapterState::Disconnected;
            return Flow::Close;
        };

        let result = match request.role {
            Role::Listener => self.hub.join(&self.session_id, self.id, tx).await,
            Role::Operator => {
                self.hub
                    .open_as_operator(
                        &self.session_id,
                        request.program_id.as_deref(),
                        self.id,
                        tx,
                    )
                    .await
            }
        };

        match result {
            Ok(_) => {
                self.role = Some(request.role);
                self.state = AdapterState::Joined;
                self.hand_over();
                Flow::Continue
            }
            Err(e) => {
                warn!(
                    "Connection {}: JOIN to session {} rejected: {}",
                    self.id, self.session_id, e
                );
                self.reply_error(&e);
                self.close_outbound();
                self.state = AdapterState::Disconnected;
                Flow::Close
            }
        }
    }

    async fn on_operator_command(&mut self, command: ClientMessage) -> Flow {
        if self.role != Some(Role::Operator) || self.state != AdapterState::Joined {
            warn!(
                "Connection {}: blocked {} from non-operator",
                self.id,
                command.kind()
            );
            self.reply_error(&HubError::NotOperator(command.kind().to_string()));
            return Flow::Continue;
        }

        let session_id = self.session_id.clone();
        let result: HubResult<()> = match command {
            ClientMessage::Play(_) => self.hub.apply_play(&session_id).await.map(drop),
            ClientMessage::Pause(_) => self.hub.apply_pause(&session_id).await.map(drop),
            ClientMessage::Seek(seek) => self
                .hub
                .apply_seek(&session_id, seek.position)
                .await
                .map(drop),
            ClientMessage::TrackChange(change) => self
                .hub
                .apply_track_change(&session_id, change.track_index)
                .await
                .map(drop),
            ClientMessage::SessionStart(request) => {
                self.hub.start_session(&session_id, request).await.map(drop)
            }
            ClientMessage::SessionEnd(_) => {
                let result = self.hub.end_session(&session_id).await;
                if result.is_ok() {
                    self.state = AdapterState::Left;
                }
                result
            }
            other => Err(HubError::InvalidInput(format!(
                "{} is not an operator command",
                other.kind()
            ))),
        };

        if let Err(e) = result {
            self.reply_error(&e);
        }
        Flow::Continue
    }

    /// JOIN deadline passed; closes the connection if it never joined
    pub fn on_join_timeout(&mut self) -> Flow {
        if self.state != AdapterState::Connecting {
            return Flow::Continue;
        }
        info!("Connection {}: no JOIN within timeout, closing", self.id);
        self.reply(ServerMessage::error(
            sdsync_common::wire::ErrorCode::JoinTimeout,
            "JOIN not received in time",
        ));
        self.close_outbound();
        self.state = AdapterState::Disconnected;
        Flow::Close
    }

    /// Socket closed; release membership
    ///
    /// Safe to call more than once.
    pub async fn on_close(&mut self) {
        if self.state == AdapterState::Joined {
            match self.role {
                Some(Role::Operator) => {
                    self.hub.release_operator(&self.session_id, self.id).await;
                }
                _ => match self.hub.leave(&self.session_id, self.id).await {
                    Ok(_) => {}
                    Err(HubError::SessionNotFound(_)) => {
                        debug!("Connection {}: session already gone", self.id)
                    }
                    Err(e) => warn!("Connection {}: leave failed: {}", self.id, e),
                },
            }
        }
        self.close_outbound();
        if self.state != AdapterState::Left {
            self.state = AdapterState::Disconnected;
        }
        debug!("Connection {} closed", self.id);
    }
}

impl Drop for ConnectionAdapter {
    fn drop(&mut self) {
        if self.state == AdapterState::Joined {
            // Socket task ended without on_close; clean up in the background
            let hub = Arc::clone(&self.hub);
            let session_id = std::mem::take(&mut self.session_id);
            let id = self.id;
            let role = self.role;
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    match role {
                        Some(Role::Operator) => hub.release_operator(&session_id, id).await,
                        _ => {
                            let _ = hub.leave(&session_id, id).await;
                        }
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::notifications::Notifier;
    use sdsync_common::time::SystemClock;
    use sdsync_common::wire::{Empty, ErrorCode};
    use sdsync_common::SyncEvent;

    fn hub() -> Arc<Hub> {
        Arc::new(Hub::new(
            Arc::new(StaticCatalog::new()),
            Arc::new(SystemClock),
            Notifier::default(),
        ))
    }

    #[tokio::test]
    async fn test_listener_join_unknown_session_closes() {
        let (mut adapter, mut rx) = ConnectionAdapter::open(hub(), "ghost", 8);
        let flow = adapter.on_message(ClientMessage::join(Role::Listener)).await;
        assert_eq!(flow, Flow::Close);
        assert_eq!(adapter.state(), AdapterState::Disconnected);

        match rx.recv().await.unwrap() {
            ServerMessage::Error(e) => assert_eq!(e.code, ErrorCode::SessionNotFound),
            other => panic!("unexpected {:?}", other),
        }
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_listener_cannot_send_commands() {
        let hub = hub();
        hub.create_session(Some("s1".to_string()), None).await.unwrap();

        let (mut adapter, mut rx) = ConnectionAdapter::open(Arc::clone(&hub), "s1", 8);
        adapter.on_message(ClientMessage::join(Role::Listener)).await;
        assert_eq!(adapter.state(), AdapterState::Joined);
        rx.recv().await.unwrap(); // STATE_SYNC
        rx.recv().await.unwrap(); // PARTICIPANT_COUNT

        let flow = adapter.on_message(ClientMessage::Play(Empty {})).await;
        assert_eq!(flow, Flow::Continue);
        match rx.recv().await.unwrap() {
            ServerMessage::Error(e) => assert_eq!(e.code, ErrorCode::NotOperator),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!hub.state("s1").await.unwrap().playing);
    }

    #[tokio::test]
    async fn test_operator_join_creates_and_second_operator_rejected() {
        let hub = hub();
        let (mut first, _first_rx) = ConnectionAdapter::open(Arc::clone(&hub), "s1", 8);
        assert_eq!(
            first.on_message(ClientMessage::join(Role::Operator)).await,
            Flow::Continue
        );
        assert!(hub.state("s1").await.is_ok());

        let (mut second, mut second_rx) = ConnectionAdapter::open(Arc::clone(&hub), "s1", 8);
        assert_eq!(
            second.on_message(ClientMessage::join(Role::Operator)).await,
            Flow::Close
        );
        match second_rx.recv().await.unwrap() {
            ServerMessage::Error(e) => assert_eq!(e.code, ErrorCode::OperatorConflict),
            other => panic!("unexpected {:?}", other),
        }

        first.on_close().await;
        let (mut third, _third_rx) = ConnectionAdapter::open(Arc::clone(&hub), "s1", 8);
        assert_eq!(
            third.on_message(ClientMessage::join(Role::Operator)).await,
            Flow::Continue
        );
    }

    #[tokio::test]
    async fn test_close_is_idempotent_for_count() {
        let hub = hub();
        hub.create_session(Some("s1".to_string()), None).await.unwrap();

        let (mut a, _a_rx) = ConnectionAdapter::open(Arc::clone(&hub), "s1", 8);
        let (mut b, mut b_rx) = ConnectionAdapter::open(Arc::clone(&hub), "s1", 8);
        a.on_message(ClientMessage::join(Role::Listener)).await;
        b.on_message(ClientMessage::join(Role::Listener)).await;
        while b_rx.try_recv().is_ok() {}

        a.on_close().await;
        a.on_close().await;

        assert_eq!(
            b_rx.recv().await.unwrap(),
            ServerMessage::from(SyncEvent::ParticipantCount(1))
        );
        assert!(b_rx.try_recv().is_err());
        assert_eq!(hub.state("s1").await.unwrap().participant_count, 1);
    }

    #[tokio::test]
    async fn test_malformed_frame_answers_protocol_error() {
        let (mut adapter, mut rx) = ConnectionAdapter::open(hub(), "s1", 8);
        assert_eq!(adapter.on_text("{not json").await, Flow::Continue);
        match rx.recv().await.unwrap() {
            ServerMessage::Error(e) => assert_eq!(e.code, ErrorCode::Protocol),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(adapter.state(), AdapterState::Connecting);
    }

    #[tokio::test]
    async fn test_join_timeout_only_applies_before_join() {
        let (mut adapter, mut rx) = ConnectionAdapter::open(hub(), "s1", 8);
        assert_eq!(adapter.on_join_timeout(), Flow::Close);
        match rx.recv().await.unwrap() {
            ServerMessage::Error(e) => assert_eq!(e.code, ErrorCode::JoinTimeout),
            other => panic!("unexpected {:?}", other),
        }
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_session_end_closes_listener_queues() {
        let hub = hub();
        let (mut op, _op_rx) = ConnectionAdapter::open(Arc::clone(&hub), "s1", 8);
        op.on_message(ClientMessage::join(Role::Operator)).await;

        let (mut listener, mut rx) = ConnectionAdapter::open(Arc::clone(&hub), "s1", 8);
        listener.on_message(ClientMessage::join(Role::Listener)).await;

        op.on_message(ClientMessage::SessionEnd(Empty {})).await;
        assert_eq!(op.state(), AdapterState::Left);

        let mut last = None;
        while let Some(msg) = rx.recv().await {
            last = Some(msg);
        }
        assert_eq!(last, Some(ServerMessage::from(SyncEvent::SessionEnded)));

        listener.on_close().await;
        assert_eq!(listener.state(), AdapterState::Disconnected);
    }
}
