//! Audio engine seams
//!
//! Two independent resources are modelled here:
//! - [`AudioEngine`]: the program-audio player (one track source at a time)
//! - [`AudioPlatform`] / [`AudioContext`]: the low-level platform audio context
//!   used for the unlock tone and the keep-alive tones
//!
//! The keep-alive context is never the program engine, so keep-alive emission
//! cannot race a real play/pause transition for the same resource.

use std::time::Duration;

use sdsync_common::TrackRef;
use tracing::{debug, info};

use crate::error::ClientResult;

/// How much media the engine has buffered
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Readiness {
    Empty,
    Metadata,
    CurrentData,
    FutureData,
    EnoughData,
}

impl Readiness {
    /// Enough buffered to start without stalling
    pub fn is_smooth(self) -> bool {
        self >= Readiness::FutureData
    }
}

/// Notifications from the program-audio engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    ReadinessChanged(Readiness),
    PlaybackStarted,
}

/// Program-audio player
pub trait AudioEngine: Send + 'static {
    /// Switch to a new track source
    fn load(&mut self, track: &TrackRef) -> ClientResult<()>;

    fn seek(&mut self, position: f64);

    /// Start playback; `Err(PlaybackRejected)` when the platform refuses
    fn play(&mut self) -> ClientResult<()>;

    fn pause(&mut self);

    fn readiness(&self) -> Readiness;

    /// Duration of the loaded track, once known
    fn duration(&self) -> Option<f64>;

    /// Muted play/pause cycle used by the unlock sequence
    fn prime(&mut self) -> ClientResult<()> {
        Ok(())
    }
}

/// Platform audio context (one per owner, released with [`AudioContext::close`])
pub trait AudioContext: Send {
    /// Leave the suspended state some platforms start in
    fn resume(&mut self) -> ClientResult<()>;

    /// Schedule a tone starting now
    fn emit_tone(&mut self, frequency_hz: f64, gain: f64, length: Duration) -> ClientResult<()>;

    fn close(&mut self);
}

pub trait AudioPlatform: Send + Sync {
    fn open_context(&self) -> ClientResult<Box<dyn AudioContext>>;
}

/// Headless engine that only logs what it is asked to do
///
/// Reports full readiness as soon as a track is loaded.
#[derive(Debug, Default)]
pub struct LoggingEngine {
    track: Option<TrackRef>,
    position: f64,
    playing: bool,
}

impl LoggingEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioEngine for LoggingEngine {
    fn load(&mut self, track: &TrackRef) -> ClientResult<()> {
        info!("load {}", track.uri);
        self.track = Some(track.clone());
        self.position = 0.0;
        Ok(())
    }

    fn seek(&mut self, position: f64) {
        debug!("seek {:.3}s", position);
        self.position = position;
    }

    fn play(&mut self) -> ClientResult<()> {
        if !self.playing {
            info!("play at {:.3}s", self.position);
        }
        self.playing = true;
        Ok(())
    }

    fn pause(&mut self) {
        if self.playing {
            info!("pause at {:.3}s", self.position);
        }
        self.playing = false;
    }

    fn readiness(&self) -> Readiness {
        if self.track.is_some() {
            Readiness::EnoughData
        } else {
            Readiness::Empty
        }
    }

    fn duration(&self) -> Option<f64> {
        self.track.as_ref().and_then(|t| t.duration_secs)
    }
}

/// Platform without audio output; tones are logged and dropped
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentPlatform;

struct SilentContext;

impl AudioContext for SilentContext {
    fn resume(&mut self) -> ClientResult<()> {
        Ok(())
    }

    fn emit_tone(&mut self, frequency_hz: f64, gain: f64, length: Duration) -> ClientResult<()> {
        debug!(
            "tone {} Hz gain {} for {} ms",
            frequency_hz,
            gain,
            length.as_millis()
        );
        Ok(())
    }

    fn close(&mut self) {}
}

impl AudioPlatform for SilentPlatform {
    fn open_context(&self) -> ClientResult<Box<dyn AudioContext>> {
        Ok(Box::new(SilentContext))
    }
}
