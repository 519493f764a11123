//! Error types for sdsync-hub

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use sdsync_common::wire::{ErrorCode, ServerMessage};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    /// Unknown or already-ended session
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Explicit session id already taken
    #[error("Session already exists: {0}")]
    AlreadyExists(String),

    /// Another connection holds the operator role
    #[error("Session {0} already has an operator")]
    OperatorConflict(String),

    /// Control command from a connection that is not the operator
    #[error("Only the session operator may send {0}")]
    NotOperator(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Malformed frame or socket-level failure
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type HubResult<T> = Result<T, HubError>;

impl HubError {
    /// Stable wire code
    pub fn code(&self) -> ErrorCode {
        match self {
            HubError::SessionNotFound(_) => ErrorCode::SessionNotFound,
            HubError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            HubError::OperatorConflict(_) => ErrorCode::OperatorConflict,
            HubError::NotOperator(_) => ErrorCode::NotOperator,
            HubError::InvalidInput(_) => ErrorCode::InvalidInput,
            HubError::Transport(_) => ErrorCode::Protocol,
            HubError::Config(_) => ErrorCode::Internal,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            HubError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            HubError::AlreadyExists(_) | HubError::OperatorConflict(_) => StatusCode::CONFLICT,
            HubError::NotOperator(_) => StatusCode::FORBIDDEN,
            HubError::InvalidInput(_) | HubError::Transport(_) => StatusCode::BAD_REQUEST,
            HubError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// ERROR frame reporting this failure to one connection
    pub fn to_frame(&self) -> ServerMessage {
        ServerMessage::error(self.code(), self.to_string())
    }
}

impl From<sdsync_common::Error> for HubError {
    fn from(err: sdsync_common::Error) -> Self {
        use sdsync_common::Error;
        match err {
            Error::Config(msg) => HubError::Config(msg),
            Error::Io(e) => HubError::Config(e.to_string()),
            Error::Protocol(msg) => HubError::Transport(msg),
            Error::InvalidInput(msg) => HubError::InvalidInput(msg),
            Error::Internal(msg) => HubError::Transport(msg),
        }
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let code = serde_json::to_value(self.code()).unwrap_or_else(|_| json!("INTERNAL"));
        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        }));

        (self.status(), body).into_response()
    }
}
