//! One live session
//!
//! Holds the Timeline State and the membership of a session. Everything here is
//! synchronous; the registry wraps each session in its own mutex so callers
//! already have exclusive access.
//!
//! Connections are referenced by [`ConnectionId`] only. The outbound queue
//! sender stored for a member is the connection's only strong sender once it has
//! joined, so removing the member is what closes its socket.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sdsync_common::ids::ConnectionId;
use sdsync_common::timeline::clamp_position;
use sdsync_common::{SessionSnapshot, ServerMessage, SyncEvent, TimelineState, TrackRef};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use crate::error::{HubError, HubResult};

/// Display metadata, normally from the catalog
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionMeta {
    pub display_name: Option<String>,
    pub cover_image: Option<String>,
    pub track_list: Vec<TrackRef>,
    pub program_id: Option<String>,
}

#[derive(Debug)]
pub struct Member {
    tx: mpsc::Sender<ServerMessage>,
}

#[derive(Debug)]
struct OperatorSlot {
    id: ConnectionId,
    tx: mpsc::Sender<ServerMessage>,
}

#[derive(Debug)]
pub struct Session {
    id: String,
    meta: SessionMeta,
    timeline: TimelineState,
    started: bool,
    ended: bool,
    listeners: HashMap<ConnectionId, Member>,
    operator: Option<OperatorSlot>,
    /// Set while no operator is connected
    operator_absent_since: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>, meta: SessionMeta, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            meta,
            timeline: TimelineState::new(now),
            started: false,
            ended: false,
            listeners: HashMap::new(),
            operator: None,
            operator_absent_since: Some(now),
            created_at: now,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn meta(&self) -> &SessionMeta {
        &self.meta
    }

    pub fn timeline(&self) -> &TimelineState {
        &self.timeline
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Operator has sent SESSION_START
    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn participant_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_member(&self, id: ConnectionId) -> bool {
        self.listeners.contains_key(&id)
    }

    pub fn operator_id(&self) -> Option<ConnectionId> {
        self.operator.as_ref().map(|op| op.id)
    }

    pub fn operator_absent_since(&self) -> Option<DateTime<Utc>> {
        self.operator_absent_since
    }

    pub fn current_track_duration(&self) -> Option<f64> {
        self.meta
            .track_list
            .get(self.timeline.track_index)
            .and_then(|t| t.duration_secs)
    }

    /// Current derived state, anchored at `now`
    pub fn snapshot(&self, now: DateTime<Utc>) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            track_index: self.timeline.track_index,
            playing: self.timeline.playing,
            position: self
                .timeline
                .derived_position(now, self.current_track_duration()),
            reference_instant: now,
            participant_count: self.listeners.len(),
            display_name: self.meta.display_name.clone(),
            cover_image: self.meta.cover_image.clone(),
            track_list: self.meta.track_list.clone(),
        }
    }

    fn derived_position(&self, now: DateTime<Utc>) -> f64 {
        self.timeline
            .derived_position(now, self.current_track_duration())
    }

    /// Operator (re)starts the program; timeline resets to paused at the first track
    pub fn start(
        &mut self,
        name: String,
        track_list: Vec<TrackRef>,
        cover_image: Option<String>,
        now: DateTime<Utc>,
    ) -> SyncEvent {
        self.meta.display_name = Some(name);
        if !track_list.is_empty() {
            self.meta.track_list = track_list;
        }
        if cover_image.is_some() {
            self.meta.cover_image = cover_image;
        }
        self.timeline = TimelineState::new(now);
        self.started = true;
        SyncEvent::SessionStarted(self.snapshot(now))
    }

    /// Start (or keep) playing from the derived position
    pub fn play(&mut self, now: DateTime<Utc>) -> SyncEvent {
        let position = self.derived_position(now);
        self.timeline.playing = true;
        self.timeline.set_anchor(position, now);
        SyncEvent::Play {
            track_index: self.timeline.track_index,
            position,
            reference_instant: now,
        }
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> SyncEvent {
        let position = self.derived_position(now);
        self.timeline.playing = false;
        self.timeline.set_anchor(position, now);
        SyncEvent::Pause {
            track_index: self.timeline.track_index,
            position,
            reference_instant: now,
        }
    }

    pub fn seek(&mut self, position: f64, now: DateTime<Utc>) -> SyncEvent {
        let position = clamp_position(position, self.current_track_duration());
        self.timeline.set_anchor(position, now);
        SyncEvent::Seek {
            track_index: self.timeline.track_index,
            position,
            playing: self.timeline.playing,
            reference_instant: now,
        }
    }

    pub fn change_track(&mut self, index: usize, now: DateTime<Utc>) -> HubResult<SyncEvent> {
        let tracks = self.meta.track_list.len();
        if tracks > 0 && index >= tracks {
            return Err(HubError::InvalidInput(format!(
                "track index {} out of range (session has {} tracks)",
                index, tracks
            )));
        }
        self.timeline.track_index = index;
        self.timeline.set_anchor(0.0, now);
        Ok(SyncEvent::TrackChanged {
            track_index: index,
            playing: self.timeline.playing,
            reference_instant: now,
        })
    }

    pub fn mark_ended(&mut self) {
        self.ended = true;
        self.timeline.playing = false;
    }

    /// Add a listener; `false` when it was already a member
    pub fn add_listener(&mut self, id: ConnectionId, tx: mpsc::Sender<ServerMessage>) -> bool {
        if self.listeners.contains_key(&id) {
            return false;
        }
        self.listeners.insert(id, Member { tx });
        true
    }

    /// Remove a listener; `false` when it was not a member
    pub fn remove_listener(&mut self, id: ConnectionId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    pub fn claim_operator(
        &mut self,
        id: ConnectionId,
        tx: mpsc::Sender<ServerMessage>,
    ) -> HubResult<()> {
        match &self.operator {
            Some(op) if op.id != id => Err(HubError::OperatorConflict(self.id.clone())),
            Some(_) => Ok(()),
            None => {
                self.operator = Some(OperatorSlot { id, tx });
                self.operator_absent_since = None;
                Ok(())
            }
        }
    }

    /// Free the operator role if `id` holds it
    pub fn release_operator(&mut self, id: ConnectionId, now: DateTime<Utc>) -> bool {
        if self.operator_id() == Some(id) {
            self.operator = None;
            self.operator_absent_since = Some(now);
            true
        } else {
            false
        }
    }

    /// Drop every connection sender; their sockets close once drained
    pub fn disconnect_all(&mut self) {
        self.listeners.clear();
        self.operator = None;
    }

    /// Queue `msg` for every member and the operator without waiting
    ///
    /// Listeners whose queue is full or closed are removed and returned.
    pub fn fan_out(&mut self, msg: &ServerMessage) -> Vec<ConnectionId> {
        let mut evicted = Vec::new();
        for (id, member) in &self.listeners {
            match member.tx.try_send(msg.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => evicted.push(*id),
            }
        }
        for id in &evicted {
            self.listeners.remove(id);
        }

        if let Some(op) = &self.operator {
            if let Err(e) = op.tx.try_send(msg.clone()) {
                debug!(
                    "Session {}: {} not delivered to operator {}: {}",
                    self.id,
                    msg.kind(),
                    op.id,
                    e
                );
            }
        }
        evicted
    }
}
