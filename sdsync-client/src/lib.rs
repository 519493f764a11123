//! # sdsync Client Library
//!
//! Listener side of session sync:
//! - Playback synchronizer applying latency-compensated sync events to an audio engine
//! - Resilience layer: reconnection, audio unlock, keep-alive
//! - Clock offset estimate from PING/PONG
//! - Session channel transport (WebSocket)

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod resilience;
pub mod synchronizer;
pub mod transport;

pub use config::ClientConfig;
pub use engine::{AudioContext, AudioEngine, AudioPlatform, EngineEvent, Readiness};
pub use error::{ClientError, ClientResult};
pub use resilience::{ClientHandle, ClientState, ClientStatus, ResilienceLayer};
pub use synchronizer::{Directive, PlaybackSynchronizer};
pub use transport::{Connection, Connector, WsConnector};
