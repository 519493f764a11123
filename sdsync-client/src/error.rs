//! Error types for sdsync-client

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClientError {
    /// The hub does not know the session (assumed ended)
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Socket-level failure; triggers reconnection, never fatal
    #[error("Transport error: {0}")]
    Transport(String),

    /// The audio engine refused to start playback
    #[error("Playback rejected: {0}")]
    PlaybackRejected(String),

    /// Readiness not reached within the load deadline
    #[error("Audio still loading after {deadline_ms} ms")]
    SlowLoad { deadline_ms: u64 },

    /// Malformed or unexpected frame from the hub
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Platform audio context or source could not be used
    #[error("Audio unavailable: {0}")]
    AudioUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type ClientResult<T> = Result<T, ClientError>;

impl From<sdsync_common::Error> for ClientError {
    fn from(err: sdsync_common::Error) -> Self {
        use sdsync_common::Error;
        match err {
            Error::Config(msg) => ClientError::Config(msg),
            Error::Io(e) => ClientError::Config(e.to_string()),
            Error::Protocol(msg) => ClientError::Protocol(msg),
            Error::InvalidInput(msg) | Error::Internal(msg) => ClientError::Protocol(msg),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

impl ClientError {
    /// Conditions that are shown to the user but do not stop the session
    pub fn is_warning(&self) -> bool {
        matches!(self, ClientError::SlowLoad { .. } | ClientError::Transport(_))
    }
}
