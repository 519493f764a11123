//! Broadcast Hub
//!
//! Applies operator commands and membership changes to one session at a time
//! (under that session's own lock) and fans the resulting event out to every
//! connection of the session.
//!
//! Fan-out never waits: each connection has a bounded queue and a listener
//! whose queue is full or closed is removed, after which the new participant
//! count is broadcast to the rest.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sdsync_common::ids::ConnectionId;
use sdsync_common::time::Clock;
use sdsync_common::wire::SessionStartRequest;
use sdsync_common::{SessionSnapshot, ServerMessage, SyncEvent};
use tokio::sync::{mpsc, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::error::{HubError, HubResult};
use crate::notifications::{ActiveSession, Notice, Notifier};
use crate::registry::{SessionRegistry, SharedSession};
use crate::session::{Session, SessionMeta};

/// Session overview for the HTTP API
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub participant_count: usize,
    pub has_operator: bool,
    pub started: bool,
    pub state: SessionSnapshot,
}

pub struct Hub {
    registry: SessionRegistry,
    catalog: Arc<dyn Catalog>,
    clock: Arc<dyn Clock>,
    notifier: Notifier,
}

impl Hub {
    pub fn new(catalog: Arc<dyn Catalog>, clock: Arc<dyn Clock>, notifier: Notifier) -> Self {
        Self {
            registry: SessionRegistry::new(),
            catalog,
            clock,
            notifier,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    fn meta_for(&self, session_id: &str, program_id: Option<&str>) -> SessionMeta {
        let program = program_id.unwrap_or(session_id);
        match self.catalog.lookup(program) {
            Some(entry) => SessionMeta {
                display_name: Some(entry.display_name),
                cover_image: entry.cover_image,
                track_list: entry.track_list,
                program_id: Some(program.to_string()),
            },
            None => {
                debug!("No catalog entry for program {}", program);
                SessionMeta {
                    program_id: program_id.map(str::to_string),
                    ..SessionMeta::default()
                }
            }
        }
    }

    /// Lock a session that has not ended
    async fn lock_live(&self, session_id: &str) -> HubResult<OwnedMutexGuard<Session>> {
        let session = self.registry.get(session_id)?.lock_owned().await;
        if session.is_ended() {
            return Err(HubError::SessionNotFound(session_id.to_string()));
        }
        Ok(session)
    }

    fn log_evictions(&self, session_id: &str, evicted: &[ConnectionId]) {
        for id in evicted {
            warn!(
                "Session {}: listener {} dropped (send queue full or closed)",
                session_id, id
            );
        }
    }

    fn broadcast_count(&self, session: &mut Session) {
        loop {
            let count = session.participant_count();
            let evicted = session.fan_out(&ServerMessage::from(SyncEvent::ParticipantCount(count)));
            if evicted.is_empty() {
                self.notifier.publish(Notice::ParticipantCount {
                    session_id: session.id().to_string(),
                    count,
                });
                return;
            }
            self.log_evictions(session.id(), &evicted);
        }
    }

    fn broadcast(&self, session: &mut Session, event: SyncEvent) {
        debug!("Session {}: broadcasting {}", session.id(), event.kind());
        let evicted = session.fan_out(&ServerMessage::from(event));
        if !evicted.is_empty() {
            self.log_evictions(session.id(), &evicted);
            self.broadcast_count(session);
        }
    }

    /// Create a session ahead of its operator (HTTP `POST /sessions`)
    pub async fn create_session(
        &self,
        id: Option<String>,
        program_id: Option<String>,
    ) -> HubResult<SessionSnapshot> {
        if matches!(id.as_deref(), Some("")) {
            return Err(HubError::InvalidInput("session id must not be empty".to_string()));
        }
        let now = self.now();
        let meta = match program_id.as_deref().or(id.as_deref()) {
            Some(program) => self.meta_for(program, Some(program)),
            None => SessionMeta::default(),
        };
        let (id, session) = self.registry.create(id, meta, now)?;
        info!("Session {} created", id);
        let snapshot = session.lock().await.snapshot(now);
        Ok(snapshot)
    }

    /// Claim the operator role, creating the session if it does not exist yet
    ///
    /// The operator's queue receives a STATE_SYNC and every broadcast that follows.
    pub async fn open_as_operator(
        &self,
        session_id: &str,
        program_id: Option<&str>,
        conn: ConnectionId,
        tx: mpsc::Sender<ServerMessage>,
    ) -> HubResult<SessionSnapshot> {
        let now = self.now();
        let (shared, created) =
            self.registry
                .get_or_create(session_id, || self.meta_for(session_id, program_id), now);
        if created {
            info!("Session {} created by operator {}", session_id, conn);
        }

        let mut session = shared.lock_owned().await;
        if session.is_ended() {
            return Err(HubError::SessionNotFound(session_id.to_string()));
        }
        session.claim_operator(conn, tx.clone())?;

        let snapshot = session.snapshot(now);
        if tx.try_send(ServerMessage::StateSync(snapshot.clone())).is_err() {
            session.release_operator(conn, now);
            return Err(HubError::Transport(format!("operator {} queue closed", conn)));
        }
        info!("Session {}: operator {} connected", session_id, conn);
        Ok(snapshot)
    }

    pub async fn release_operator(&self, session_id: &str, conn: ConnectionId) {
        let Ok(shared) = self.registry.get(session_id) else {
            return;
        };
        let now = self.now();
        if shared.lock().await.release_operator(conn, now) {
            info!("Session {}: operator {} disconnected", session_id, conn);
        }
    }

    /// SESSION_START: set program metadata and reset the timeline
    pub async fn start_session(
        &self,
        session_id: &str,
        request: SessionStartRequest,
    ) -> HubResult<SessionSnapshot> {
        if request.name.trim().is_empty() {
            return Err(HubError::InvalidInput("session name must not be empty".to_string()));
        }
        let mut session = self.lock_live(session_id).await?;
        let now = self.now();
        let event = session.start(request.name, request.track_list, request.cover_image, now);
        let snapshot = match &event {
            SyncEvent::SessionStarted(snapshot) => snapshot.clone(),
            _ => session.snapshot(now),
        };
        self.broadcast(&mut session, event);

        self.notifier.publish(Notice::SessionStart {
            session_id: session_id.to_string(),
            display_name: snapshot.display_name.clone(),
            cover_image: snapshot.cover_image.clone(),
        });
        info!(
            "Session {} started: {:?} ({} tracks)",
            session_id,
            snapshot.display_name,
            snapshot.track_list.len()
        );
        Ok(snapshot)
    }

    pub async fn apply_play(&self, session_id: &str) -> HubResult<SyncEvent> {
        let mut session = self.lock_live(session_id).await?;
        let event = session.play(self.now());
        self.broadcast(&mut session, event.clone());
        Ok(event)
    }

    pub async fn apply_pause(&self, session_id: &str) -> HubResult<SyncEvent> {
        let mut session = self.lock_live(session_id).await?;
        let event = session.pause(self.now());
        self.broadcast(&mut session, event.clone());
        Ok(event)
    }

    pub async fn apply_seek(&self, session_id: &str, position: f64) -> HubResult<SyncEvent> {
        let mut session = self.lock_live(session_id).await?;
        let event = session.seek(position, self.now());
        self.broadcast(&mut session, event.clone());
        Ok(event)
    }

    pub async fn apply_track_change(&self, session_id: &str, index: usize) -> HubResult<SyncEvent> {
        let mut session = self.lock_live(session_id).await?;
        let event = session.change_track(index, self.now())?;
        self.broadcast(&mut session, event.clone());
        Ok(event)
    }

    /// Add a listener and send it the current derived state
    ///
    /// Joining twice is not an error: the snapshot is re-sent and the count is
    /// left alone.
    pub async fn join(
        &self,
        session_id: &str,
        conn: ConnectionId,
        tx: mpsc::Sender<ServerMessage>,
    ) -> HubResult<SessionSnapshot> {
        let mut session = self.lock_live(session_id).await?;
        let now = self.now();

        let added = session.add_listener(conn, tx.clone());
        let snapshot = session.snapshot(now);
        if tx.try_send(ServerMessage::StateSync(snapshot.clone())).is_err() {
            session.remove_listener(conn);
            if !added {
                self.broadcast_count(&mut session);
            }
            return Err(HubError::Transport(format!("listener {} queue unavailable", conn)));
        }

        if added {
            info!(
                "Session {}: listener {} joined ({} listening)",
                session_id,
                conn,
                session.participant_count()
            );
            self.broadcast_count(&mut session);
        } else {
            debug!("Session {}: listener {} already joined", session_id, conn);
        }
        Ok(snapshot)
    }

    /// Remove a listener; `Ok(false)` when it was not a member
    pub async fn leave(&self, session_id: &str, conn: ConnectionId) -> HubResult<bool> {
        let mut session = self.lock_live(session_id).await?;
        if !session.remove_listener(conn) {
            debug!("Session {}: listener {} already left", session_id, conn);
            return Ok(false);
        }
        info!(
            "Session {}: listener {} left ({} listening)",
            session_id,
            conn,
            session.participant_count()
        );
        self.broadcast_count(&mut session);
        Ok(true)
    }

    /// Notify everyone, disconnect every member and drop the session
    pub async fn end_session(&self, session_id: &str) -> HubResult<()> {
        let shared = self.registry.get(session_id)?;
        let mut session = shared.lock().await;
        if session.is_ended() {
            return Err(HubError::SessionNotFound(session_id.to_string()));
        }
        self.finish(&mut session);
        drop(session);
        self.registry.remove_if_same(session_id, &shared);
        Ok(())
    }

    fn finish(&self, session: &mut Session) {
        session.mark_ended();
        self.broadcast(session, SyncEvent::SessionEnded);
        session.disconnect_all();
        self.notifier.publish(Notice::SessionEnd {
            session_id: session.id().to_string(),
        });
        info!("Session {} ended", session.id());
    }

    /// End every session whose operator has been gone longer than `idle_timeout`
    pub async fn reap_idle(&self, idle_timeout: Duration) -> Vec<String> {
        let limit = chrono::Duration::from_std(idle_timeout)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        let now = self.now();
        let mut reaped = Vec::new();

        for (id, shared) in self.registry.all() {
            let mut session = shared.lock().await;
            if session.is_ended() {
                continue;
            }
            let idle = match session.operator_absent_since() {
                Some(since) => now.signed_duration_since(since) >= limit,
                None => false,
            };
            if idle {
                info!("Session {} idle without operator, ending", id);
                self.finish(&mut session);
                drop(session);
                self.registry.remove_if_same(&id, &shared);
                reaped.push(id);
            }
        }
        reaped
    }

    pub async fn state(&self, session_id: &str) -> HubResult<SessionSnapshot> {
        let session = self.lock_live(session_id).await?;
        Ok(session.snapshot(self.now()))
    }

    async fn summarize(&self, shared: &SharedSession) -> Option<SessionSummary> {
        let session = shared.lock().await;
        if session.is_ended() {
            return None;
        }
        Some(SessionSummary {
            session_id: session.id().to_string(),
            participant_count: session.participant_count(),
            has_operator: session.operator_id().is_some(),
            started: session.is_started(),
            state: session.snapshot(self.now()),
        })
    }

    pub async fn summary(&self, session_id: &str) -> HubResult<SessionSummary> {
        let shared = self.registry.get(session_id)?;
        self.summarize(&shared)
            .await
            .ok_or_else(|| HubError::SessionNotFound(session_id.to_string()))
    }

    pub async fn summaries(&self) -> Vec<SessionSummary> {
        let mut summaries = Vec::new();
        for (_, shared) in self.registry.all() {
            if let Some(summary) = self.summarize(&shared).await {
                summaries.push(summary);
            }
        }
        summaries
    }

    /// Sessions whose operator has sent SESSION_START
    pub async fn active_sessions(&self) -> Vec<ActiveSession> {
        self.summaries()
            .await
            .into_iter()
            .filter(|s| s.started)
            .map(|s| ActiveSession {
                session_id: s.session_id,
                display_name: s.state.display_name,
                cover_image: s.state.cover_image,
                playing: s.state.playing,
                participant_count: s.participant_count,
            })
            .collect()
    }
}
