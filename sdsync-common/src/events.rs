//! Sync event types broadcast from the hub to session members

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timeline::{derive_position, TrackRef};

/// Full picture of a session at one instant
///
/// `position` is already derived for `reference_instant`, so a late joiner can
/// start mid-stream rather than at zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub track_index: usize,
    pub playing: bool,
    pub position: f64,
    pub reference_instant: DateTime<Utc>,
    pub participant_count: usize,
    pub display_name: Option<String>,
    pub cover_image: Option<String>,
    #[serde(default)]
    pub track_list: Vec<TrackRef>,
}

impl SessionSnapshot {
    /// Duration of the current track, when known
    pub fn current_track_duration(&self) -> Option<f64> {
        self.track_list
            .get(self.track_index)
            .and_then(|t| t.duration_secs)
    }

    /// Position this snapshot implies at `now`
    pub fn position_at(&self, now: DateTime<Utc>) -> f64 {
        derive_position(
            self.position,
            self.reference_instant,
            self.playing,
            now,
            self.current_track_duration(),
        )
    }
}

/// Atomic unit broadcast to listeners
///
/// Every variant except `Joined` and `ParticipantCount` carries enough data for a
/// listener that missed all prior events to reach the correct audible state from
/// this event plus the session's track list.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Snapshot sent to one connection on join (or state re-request)
    Joined(SessionSnapshot),

    /// Operator (re)started the program; timeline reset
    SessionStarted(SessionSnapshot),

    Play {
        track_index: usize,
        position: f64,
        reference_instant: DateTime<Utc>,
    },

    Pause {
        track_index: usize,
        position: f64,
        reference_instant: DateTime<Utc>,
    },

    Seek {
        track_index: usize,
        position: f64,
        playing: bool,
        reference_instant: DateTime<Utc>,
    },

    TrackChanged {
        track_index: usize,
        playing: bool,
        reference_instant: DateTime<Utc>,
    },

    ParticipantCount(usize),

    SessionEnded,
}

impl SyncEvent {
    /// Whether the event says the program is audible right now
    ///
    /// `None` for events that carry no play state.
    pub fn implies_playing(&self) -> Option<bool> {
        match self {
            SyncEvent::Joined(s) | SyncEvent::SessionStarted(s) => Some(s.playing),
            SyncEvent::Play { .. } => Some(true),
            SyncEvent::Pause { .. } => Some(false),
            SyncEvent::Seek { playing, .. } | SyncEvent::TrackChanged { playing, .. } => {
                Some(*playing)
            }
            SyncEvent::ParticipantCount(_) => None,
            SyncEvent::SessionEnded => Some(false),
        }
    }

    /// Short name for log lines
    pub fn kind(&self) -> &'static str {
        match self {
            SyncEvent::Joined(_) => "Joined",
            SyncEvent::SessionStarted(_) => "SessionStarted",
            SyncEvent::Play { .. } => "Play",
            SyncEvent::Pause { .. } => "Pause",
            SyncEvent::Seek { .. } => "Seek",
            SyncEvent::TrackChanged { .. } => "TrackChanged",
            SyncEvent::ParticipantCount(_) => "ParticipantCount",
            SyncEvent::SessionEnded => "SessionEnded",
        }
    }
}
