//! Client Playback Synchronizer
//!
//! Turns each [`SyncEvent`] into seek/play/pause calls on the local
//! [`AudioEngine`], compensating for the time the event spent in flight.
//!
//! The synchronizer owns no timers. Whenever it needs one it returns a
//! [`Directive`] and the caller reports back through [`retry_play`] and
//! [`load_deadline_elapsed`] when the timer fires.
//!
//! [`retry_play`]: PlaybackSynchronizer::retry_play
//! [`load_deadline_elapsed`]: PlaybackSynchronizer::load_deadline_elapsed

use std::time::Duration;

use chrono::{DateTime, Utc};
use sdsync_common::timeline::{clamp_position, derive_position};
use sdsync_common::{SessionSnapshot, SyncEvent, TrackRef};
use tracing::{debug, info, warn};

use crate::engine::{AudioEngine, EngineEvent};
use crate::error::{ClientError, ClientResult};

/// Timer requests for the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Call [`PlaybackSynchronizer::retry_play`] after the delay
    RetryPlayAfter(Duration),
    /// (Re)start the load deadline
    ArmLoadDeadline(Duration),
    /// Cancel any pending load deadline
    DisarmLoadDeadline,
}

pub struct PlaybackSynchronizer<E> {
    engine: E,
    track_list: Vec<TrackRef>,
    loaded: Option<usize>,
    playing: bool,
    /// Start once the freshly loaded track is ready
    pending_play: bool,
    retry_pending: bool,
    deadline_armed: bool,
    play_retry_delay: Duration,
    load_deadline: Duration,
}

impl<E: AudioEngine> PlaybackSynchronizer<E> {
    pub fn new(engine: E, play_retry_delay: Duration, load_deadline: Duration) -> Self {
        Self {
            engine,
            track_list: Vec::new(),
            loaded: None,
            playing: false,
            pending_play: false,
            retry_pending: false,
            deadline_armed: false,
            play_retry_delay,
            load_deadline,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Whether the last applied event wants audio running
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn loaded_track(&self) -> Option<usize> {
        self.loaded
    }

    pub fn track_list(&self) -> &[TrackRef] {
        &self.track_list
    }

    /// Apply one event; `hub_now` is the local clock corrected onto the hub's
    pub fn apply(
        &mut self,
        event: &SyncEvent,
        hub_now: DateTime<Utc>,
    ) -> ClientResult<Vec<Directive>> {
        let mut out = Vec::new();
        match event {
            SyncEvent::Joined(snapshot) | SyncEvent::SessionStarted(snapshot) => {
                self.apply_snapshot(snapshot, hub_now, &mut out)?;
            }
            SyncEvent::Play {
                track_index,
                position,
                reference_instant,
            } => {
                self.ensure_track(*track_index)?;
                let target = self.target_position(*position, *reference_instant, true, hub_now);
                self.engine.seek(target);
                self.start_play(&mut out)?;
            }
            SyncEvent::Pause {
                track_index,
                position,
                ..
            } => {
                self.ensure_track(*track_index)?;
                let target = clamp_position(*position, self.duration());
                self.engine.seek(target);
                self.stop(&mut out);
            }
            SyncEvent::Seek {
                track_index,
                position,
                playing,
                reference_instant,
            } => {
                self.ensure_track(*track_index)?;
                let target =
                    self.target_position(*position, *reference_instant, *playing, hub_now);
                self.engine.seek(target);
                // A listener that missed the PLAY/PAUSE converges here
                match (*playing, self.playing) {
                    (true, false) => self.start_play(&mut out)?,
                    (false, true) => self.stop(&mut out),
                    _ => {}
                }
            }
            SyncEvent::TrackChanged {
                track_index,
                playing,
                ..
            } => {
                self.loaded = None;
                self.ensure_track(*track_index)?;
                self.engine.seek(0.0);
                if *playing {
                    self.playing = true;
                    if self.engine.readiness().is_smooth() {
                        self.start_play(&mut out)?;
                    } else {
                        debug!("Track {} loading, play deferred", track_index);
                        self.pending_play = true;
                        self.arm_deadline(&mut out);
                    }
                } else {
                    self.stop(&mut out);
                }
            }
            SyncEvent::ParticipantCount(_) => {}
            SyncEvent::SessionEnded => self.stop(&mut out),
        }
        Ok(out)
    }

    fn apply_snapshot(
        &mut self,
        snapshot: &SessionSnapshot,
        hub_now: DateTime<Utc>,
        out: &mut Vec<Directive>,
    ) -> ClientResult<()> {
        if self.track_list != snapshot.track_list {
            self.track_list = snapshot.track_list.clone();
            self.loaded = None;
        }
        if self.track_list.is_empty() {
            // Program not started yet
            self.stop(out);
            return Ok(());
        }
        self.ensure_track(snapshot.track_index)?;

        let target = self.target_position(
            snapshot.position,
            snapshot.reference_instant,
            snapshot.playing,
            hub_now,
        );
        self.engine.seek(target);
        if snapshot.playing {
            self.start_play(out)
        } else {
            self.stop(out);
            Ok(())
        }
    }

    /// Timer from [`Directive::RetryPlayAfter`] fired
    ///
    /// A second rejection is returned to the caller for display.
    pub fn retry_play(&mut self) -> ClientResult<()> {
        if !self.retry_pending {
            return Ok(());
        }
        self.retry_pending = false;
        if !self.playing {
            return Ok(());
        }
        info!("Retrying play");
        self.engine.play()
    }

    /// Timer from [`Directive::ArmLoadDeadline`] fired
    pub fn load_deadline_elapsed(&mut self) -> Option<ClientError> {
        if !self.deadline_armed {
            return None;
        }
        self.deadline_armed = false;
        if self.engine.readiness().is_smooth() {
            return None;
        }
        let deadline_ms = self.load_deadline.as_millis() as u64;
        warn!("Audio not ready after {} ms", deadline_ms);
        Some(ClientError::SlowLoad { deadline_ms })
    }

    pub fn on_engine_event(&mut self, event: EngineEvent) -> ClientResult<Vec<Directive>> {
        let mut out = Vec::new();
        match event {
            EngineEvent::ReadinessChanged(readiness) if readiness.is_smooth() => {
                self.disarm_deadline(&mut out);
                if self.pending_play && self.playing {
                    self.start_play(&mut out)?;
                }
            }
            EngineEvent::ReadinessChanged(_) => {}
            EngineEvent::PlaybackStarted => self.disarm_deadline(&mut out),
        }
        Ok(out)
    }

    /// Stop audio and forget the session's program
    pub fn teardown(&mut self) {
        self.engine.pause();
        self.track_list.clear();
        self.loaded = None;
        self.playing = false;
        self.pending_play = false;
        self.retry_pending = false;
        self.deadline_armed = false;
    }

    fn duration(&self) -> Option<f64> {
        self.engine.duration().or_else(|| {
            self.loaded
                .and_then(|i| self.track_list.get(i))
                .and_then(|t| t.duration_secs)
        })
    }

    fn target_position(
        &self,
        position: f64,
        reference_instant: DateTime<Utc>,
        playing: bool,
        hub_now: DateTime<Utc>,
    ) -> f64 {
        derive_position(position, reference_instant, playing, hub_now, self.duration())
    }

    fn ensure_track(&mut self, index: usize) -> ClientResult<()> {
        if self.loaded == Some(index) {
            return Ok(());
        }
        let track = self.track_list.get(index).ok_or_else(|| {
            ClientError::Protocol(format!(
                "track index {} outside track list of {}",
                index,
                self.track_list.len()
            ))
        })?;
        self.engine.load(track)?;
        self.loaded = Some(index);
        Ok(())
    }

    fn start_play(&mut self, out: &mut Vec<Directive>) -> ClientResult<()> {
        self.playing = true;
        self.pending_play = false;
        if !self.engine.readiness().is_smooth() {
            self.arm_deadline(out);
        }
        match self.engine.play() {
            Ok(()) => Ok(()),
            Err(ClientError::PlaybackRejected(reason)) => {
                debug!("Play rejected ({}), retrying once", reason);
                self.retry_pending = true;
                out.push(Directive::RetryPlayAfter(self.play_retry_delay));
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn stop(&mut self, out: &mut Vec<Directive>) {
        self.engine.pause();
        self.playing = false;
        self.pending_play = false;
        self.retry_pending = false;
        self.disarm_deadline(out);
    }

    fn arm_deadline(&mut self, out: &mut Vec<Directive>) {
        self.deadline_armed = true;
        out.push(Directive::ArmLoadDeadline(self.load_deadline));
    }

    fn disarm_deadline(&mut self, out: &mut Vec<Directive>) {
        if self.deadline_armed {
            self.deadline_armed = false;
            out.push(Directive::DisarmLoadDeadline);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Readiness;
    use chrono::Duration as ChronoDuration;

    /// Engine double recording every call
    #[derive(Default)]
    struct FakeEngine {
        calls: Vec<String>,
        readiness: Option<Readiness>,
        rejections: usize,
        position: f64,
        playing: bool,
        duration: Option<f64>,
    }

    impl AudioEngine for FakeEngine {
        fn load(&mut self, track: &TrackRef) -> ClientResult<()> {
            self.calls.push(format!("load {}", track.uri));
            self.duration = track.duration_secs;
            Ok(())
        }

        fn seek(&mut self, position: f64) {
            self.position = position;
        }

        fn play(&mut self) -> ClientResult<()> {
            self.calls.push("play".to_string());
            if self.rejections > 0 {
                self.rejections -= 1;
                return Err(ClientError::PlaybackRejected("no user gesture".to_string()));
            }
            self.playing = true;
            Ok(())
        }

        fn pause(&mut self) {
            self.calls.push("pause".to_string());
            self.playing = false;
        }

        fn readiness(&self) -> Readiness {
            self.readiness.unwrap_or(Readiness::EnoughData)
        }

        fn duration(&self) -> Option<f64> {
            self.duration
        }
    }

    fn synchronizer(engine: FakeEngine) -> PlaybackSynchronizer<FakeEngine> {
        PlaybackSynchronizer::new(engine, Duration::from_millis(200), Duration::from_secs(5))
    }

    fn snapshot(playing: bool, position: f64, reference: DateTime<Utc>) -> SessionSnapshot {
        SessionSnapshot {
            session_id: "class-a".to_string(),
            track_index: 0,
            playing,
            position,
            reference_instant: reference,
            participant_count: 1,
            display_name: Some("Class A".to_string()),
            cover_image: None,
            track_list: vec![
                TrackRef::new("x.mp3").with_duration(240.0),
                TrackRef::new("y.mp3").with_duration(180.0),
            ],
        }
    }

    #[test]
    fn test_joined_compensates_for_latency() {
        let mut sync = synchronizer(FakeEngine::default());
        let reference = Utc::now();
        let arrival = reference + ChronoDuration::milliseconds(300);

        let directives = sync
            .apply(&SyncEvent::Joined(snapshot(true, 5.0, reference)), arrival)
            .unwrap();

        assert!(directives.is_empty());
        assert!((sync.engine().position - 5.3).abs() < 1e-9);
        assert!(sync.engine().playing);
        assert_eq!(sync.engine().calls, vec!["load x.mp3", "play"]);
    }

    #[test]
    fn test_target_clamped_to_track_duration() {
        let mut sync = synchronizer(FakeEngine::default());
        let reference = Utc::now();
        sync.apply(&SyncEvent::Joined(snapshot(false, 0.0, reference)), reference)
            .unwrap();

        let late = reference + ChronoDuration::seconds(600);
        sync.apply(
            &SyncEvent::Play {
                track_index: 0,
                position: 200.0,
                reference_instant: reference,
            },
            late,
        )
        .unwrap();
        assert_eq!(sync.engine().position, 240.0);
    }

    #[test]
    fn test_rejected_play_is_retried_once() {
        let engine = FakeEngine {
            rejections: 2,
            ..FakeEngine::default()
        };
        let mut sync = synchronizer(engine);
        let now = Utc::now();

        let directives = sync
            .apply(&SyncEvent::Joined(snapshot(true, 0.0, now)), now)
            .unwrap();
        assert_eq!(
            directives,
            vec![Directive::RetryPlayAfter(Duration::from_millis(200))]
        );

        let err = sync.retry_play().unwrap_err();
        assert!(matches!(err, ClientError::PlaybackRejected(_)));
        // No further retries without a new play request
        assert!(sync.retry_play().is_ok());
        assert_eq!(
            sync.engine().calls.iter().filter(|c| *c == "play").count(),
            2
        );
    }

    #[test]
    fn test_retry_after_pause_does_nothing() {
        let engine = FakeEngine {
            rejections: 1,
            ..FakeEngine::default()
        };
        let mut sync = synchronizer(engine);
        let now = Utc::now();
        sync.apply(&SyncEvent::Joined(snapshot(true, 0.0, now)), now)
            .unwrap();
        sync.apply(
            &SyncEvent::Pause {
                track_index: 0,
                position: 1.0,
                reference_instant: now,
            },
            now,
        )
        .unwrap();

        assert!(sync.retry_play().is_ok());
        assert!(!sync.engine().playing);
    }

    #[test]
    fn test_pause_seeks_to_exact_position() {
        let mut sync = synchronizer(FakeEngine::default());
        let now = Utc::now();
        sync.apply(&SyncEvent::Joined(snapshot(true, 0.0, now)), now)
            .unwrap();

        sync.apply(
            &SyncEvent::Pause {
                track_index: 0,
                position: 42.5,
                reference_instant: now,
            },
            now + ChronoDuration::seconds(3),
        )
        .unwrap();

        assert_eq!(sync.engine().position, 42.5);
        assert!(!sync.engine().playing);
        assert!(!sync.is_playing());
    }

    #[test]
    fn test_seek_keeps_play_state() {
        let mut sync = synchronizer(FakeEngine::default());
        let now = Utc::now();
        sync.apply(&SyncEvent::Joined(snapshot(false, 10.0, now)), now)
            .unwrap();

        sync.apply(
            &SyncEvent::Seek {
                track_index: 0,
                position: 90.0,
                playing: false,
                reference_instant: now,
            },
            now + ChronoDuration::seconds(2),
        )
        .unwrap();

        // Paused seek is applied as-is
        assert_eq!(sync.engine().position, 90.0);
        assert!(!sync.engine().playing);
    }

    #[test]
    fn test_seek_while_playing_is_compensated() {
        let mut sync = synchronizer(FakeEngine::default());
        let now = Utc::now();
        sync.apply(&SyncEvent::Joined(snapshot(true, 0.0, now)), now)
            .unwrap();

        sync.apply(
            &SyncEvent::Seek {
                track_index: 0,
                position: 90.0,
                playing: true,
                reference_instant: now,
            },
            now + ChronoDuration::milliseconds(250),
        )
        .unwrap();

        assert!((sync.engine().position - 90.25).abs() < 1e-9);
        assert!(sync.engine().playing);
    }

    #[test]
    fn test_track_change_waits_for_readiness() {
        let engine = FakeEngine {
            readiness: Some(Readiness::Metadata),
            ..FakeEngine::default()
        };
        let mut sync = synchronizer(engine);
        let now = Utc::now();
        sync.apply(&SyncEvent::Joined(snapshot(false, 0.0, now)), now)
            .unwrap();

        let directives = sync
            .apply(
                &SyncEvent::TrackChanged {
                    track_index: 1,
                    playing: true,
                    reference_instant: now,
                },
                now,
            )
            .unwrap();
        assert_eq!(
            directives,
            vec![Directive::ArmLoadDeadline(Duration::from_secs(5))]
        );
        assert_eq!(sync.loaded_track(), Some(1));
        assert_eq!(sync.engine().position, 0.0);
        assert!(!sync.engine().playing);

        sync.engine_mut().readiness = Some(Readiness::EnoughData);
        let directives = sync
            .on_engine_event(EngineEvent::ReadinessChanged(Readiness::EnoughData))
            .unwrap();
        assert_eq!(directives, vec![Directive::DisarmLoadDeadline]);
        assert!(sync.engine().playing);
    }

    #[test]
    fn test_slow_load_reported_when_deadline_passes() {
        let engine = FakeEngine {
            readiness: Some(Readiness::CurrentData),
            ..FakeEngine::default()
        };
        let mut sync = synchronizer(engine);
        let now = Utc::now();

        let directives = sync
            .apply(&SyncEvent::Joined(snapshot(true, 0.0, now)), now)
            .unwrap();
        assert_eq!(
            directives,
            vec![Directive::ArmLoadDeadline(Duration::from_secs(5))]
        );

        assert_eq!(
            sync.load_deadline_elapsed(),
            Some(ClientError::SlowLoad { deadline_ms: 5000 })
        );
        // One-shot
        assert_eq!(sync.load_deadline_elapsed(), None);
    }

    #[test]
    fn test_playback_start_disarms_deadline() {
        let engine = FakeEngine {
            readiness: Some(Readiness::CurrentData),
            ..FakeEngine::default()
        };
        let mut sync = synchronizer(engine);
        let now = Utc::now();
        sync.apply(&SyncEvent::Joined(snapshot(true, 0.0, now)), now)
            .unwrap();

        let directives = sync.on_engine_event(EngineEvent::PlaybackStarted).unwrap();
        assert_eq!(directives, vec![Directive::DisarmLoadDeadline]);
        assert_eq!(sync.load_deadline_elapsed(), None);
    }

    #[test]
    fn test_missed_events_converge_from_single_frame() {
        let mut sync = synchronizer(FakeEngine::default());
        let now = Utc::now();
        sync.apply(&SyncEvent::Joined(snapshot(false, 0.0, now)), now)
            .unwrap();

        // PLAY and TRACK_CHANGE were missed; a SEEK on track 1 still lands correctly
        sync.apply(
            &SyncEvent::Seek {
                track_index: 1,
                position: 30.0,
                playing: true,
                reference_instant: now,
            },
            now,
        )
        .unwrap();

        assert_eq!(sync.loaded_track(), Some(1));
        assert_eq!(sync.engine().position, 30.0);
        assert!(sync.engine().playing);
    }

    #[test]
    fn test_unknown_track_index_is_protocol_error() {
        let mut sync = synchronizer(FakeEngine::default());
        let now = Utc::now();
        sync.apply(&SyncEvent::Joined(snapshot(false, 0.0, now)), now)
            .unwrap();

        let err = sync
            .apply(
                &SyncEvent::Play {
                    track_index: 9,
                    position: 0.0,
                    reference_instant: now,
                },
                now,
            )
            .unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
    }

    #[test]
    fn test_snapshot_without_tracks_waits() {
        let mut sync = synchronizer(FakeEngine::default());
        let now = Utc::now();
        let mut empty = snapshot(false, 0.0, now);
        empty.track_list.clear();

        let directives = sync.apply(&SyncEvent::Joined(empty), now).unwrap();
        assert!(directives.is_empty());
        assert_eq!(sync.loaded_track(), None);
        assert_eq!(sync.engine().calls, vec!["pause"]);
    }

    #[test]
    fn test_session_end_and_teardown_stop_audio() {
        let mut sync = synchronizer(FakeEngine::default());
        let now = Utc::now();
        sync.apply(&SyncEvent::Joined(snapshot(true, 0.0, now)), now)
            .unwrap();

        sync.apply(&SyncEvent::SessionEnded, now).unwrap();
        assert!(!sync.engine().playing);

        sync.teardown();
        assert!(sync.track_list().is_empty());
        assert_eq!(sync.loaded_track(), None);
    }
}
