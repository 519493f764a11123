//! Timeline State
//!
//! The authoritative description of one session's playback: which track, whether
//! it is playing, and the position that was exactly true at a reference instant.
//!
//! **Invariant:** `position` and `reference_instant` are stored as a single anchor
//! and can only be replaced together via [`TimelineState::set_anchor`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::time::seconds_between;

/// Reference to one track of a session's program
///
/// Deserializes from either a bare URI string or `{ "uri", "durationSecs" }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TrackRefRepr")]
#[serde(rename_all = "camelCase")]
pub struct TrackRef {
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
}

impl TrackRef {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            duration_secs: None,
        }
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration_secs = Some(secs);
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TrackRefRepr {
    Uri(String),
    #[serde(rename_all = "camelCase")]
    Full {
        uri: String,
        #[serde(default)]
        duration_secs: Option<f64>,
    },
}

impl From<TrackRefRepr> for TrackRef {
    fn from(repr: TrackRefRepr) -> Self {
        match repr {
            TrackRefRepr::Uri(uri) => TrackRef::new(uri),
            TrackRefRepr::Full { uri, duration_secs } => TrackRef { uri, duration_secs },
        }
    }
}

/// Clamp a position to `[0, duration]` (upper bound only when the duration is known)
pub fn clamp_position(position: f64, duration: Option<f64>) -> f64 {
    let lower = if position.is_finite() { position.max(0.0) } else { 0.0 };
    match duration {
        Some(d) if d.is_finite() && d >= 0.0 => lower.min(d),
        _ => lower,
    }
}

/// Position implied by an anchor at `now`
///
/// While playing, elapsed time since the anchor is added. Elapsed time is never
/// negative, so a reader whose clock lags the writer sees the anchored position.
pub fn derive_position(
    position: f64,
    reference_instant: DateTime<Utc>,
    playing: bool,
    now: DateTime<Utc>,
    duration: Option<f64>,
) -> f64 {
    let elapsed = if playing {
        seconds_between(reference_instant, now).max(0.0)
    } else {
        0.0
    };
    clamp_position(position + elapsed, duration)
}

/// Authoritative playback state of one session
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineState {
    pub track_index: usize,
    pub playing: bool,
    position: f64,
    reference_instant: DateTime<Utc>,
}

impl TimelineState {
    /// Paused at the start of the first track
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            track_index: 0,
            playing: false,
            position: 0.0,
            reference_instant: now,
        }
    }

    /// Position last known exactly true
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Instant at which [`position`](Self::position) was exactly true
    pub fn reference_instant(&self) -> DateTime<Utc> {
        self.reference_instant
    }

    /// Replace the anchor pair
    pub fn set_anchor(&mut self, position: f64, reference_instant: DateTime<Utc>) {
        self.position = position;
        self.reference_instant = reference_instant;
    }

    /// Current position derived from the anchor
    pub fn derived_position(&self, now: DateTime<Utc>, duration: Option<f64>) -> f64 {
        derive_position(
            self.position,
            self.reference_instant,
            self.playing,
            now,
            duration,
        )
    }
}
