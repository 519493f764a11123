//! Session channel wire protocol
//!
//! Every frame is a JSON envelope `{ "type": "...", "data": { ... } }` with
//! SCREAMING_SNAKE_CASE types and camelCase payload fields.
//!
//! - [`ClientMessage`]: frames a connection sends to the hub (operator commands,
//!   listener JOIN, heartbeat)
//! - [`ServerMessage`]: frames the hub sends to a connection
//!
//! Decoding goes through a loose [`Envelope`] first so that a missing or `null`
//! `data` is accepted for payload-less frames and unknown types produce a
//! [`Error::Protocol`] naming the offending type.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};
use crate::events::{SessionSnapshot, SyncEvent};
use crate::timeline::TrackRef;

/// Payload for frames that carry no data
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

/// Role requested in a JOIN frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Listener,
    Operator,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JoinRequest {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeekRequest {
    pub position: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackChangeRequest {
    pub track_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStartRequest {
    pub name: String,
    #[serde(default)]
    pub track_list: Vec<TrackRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingRequest {
    pub client_time: DateTime<Utc>,
}

/// Frames sent to the hub
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    Join(JoinRequest),
    Play(Empty),
    Pause(Empty),
    Seek(SeekRequest),
    TrackChange(TrackChangeRequest),
    SessionStart(SessionStartRequest),
    SessionEnd(Empty),
    Ping(PingRequest),
    GetState(Empty),
}

impl ClientMessage {
    pub fn join(role: Role) -> Self {
        ClientMessage::Join(JoinRequest {
            role,
            program_id: None,
        })
    }

    /// Wire type name
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Join(_) => "JOIN",
            ClientMessage::Play(_) => "PLAY",
            ClientMessage::Pause(_) => "PAUSE",
            ClientMessage::Seek(_) => "SEEK",
            ClientMessage::TrackChange(_) => "TRACK_CHANGE",
            ClientMessage::SessionStart(_) => "SESSION_START",
            ClientMessage::SessionEnd(_) => "SESSION_END",
            ClientMessage::Ping(_) => "PING",
            ClientMessage::GetState(_) => "GET_STATE",
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        decode(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayPayload {
    pub track_index: usize,
    pub position: f64,
    pub reference_instant: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeekPayload {
    pub track_index: usize,
    pub position: f64,
    pub playing: bool,
    pub reference_instant: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackChangePayload {
    pub track_index: usize,
    pub playing: bool,
    pub reference_instant: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountPayload {
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PongPayload {
    pub client_time: DateTime<Utc>,
    pub server_time: DateTime<Utc>,
}

/// Stable error codes carried in ERROR frames and HTTP error bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    SessionNotFound,
    AlreadyExists,
    OperatorConflict,
    NotOperator,
    InvalidInput,
    Protocol,
    JoinTimeout,
    Internal,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
}

/// Frames sent by the hub
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    StateSync(SessionSnapshot),
    SessionStart(SessionSnapshot),
    Play(PlayPayload),
    Pause(PlayPayload),
    Seek(SeekPayload),
    TrackChange(TrackChangePayload),
    ParticipantCount(CountPayload),
    SessionEnd(Empty),
    Pong(PongPayload),
    Error(ErrorPayload),
}

impl ServerMessage {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ErrorPayload {
            code,
            message: message.into(),
        })
    }

    /// Wire type name
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::StateSync(_) => "STATE_SYNC",
            ServerMessage::SessionStart(_) => "SESSION_START",
            ServerMessage::Play(_) => "PLAY",
            ServerMessage::Pause(_) => "PAUSE",
            ServerMessage::Seek(_) => "SEEK",
            ServerMessage::TrackChange(_) => "TRACK_CHANGE",
            ServerMessage::ParticipantCount(_) => "PARTICIPANT_COUNT",
            ServerMessage::SessionEnd(_) => "SESSION_END",
            ServerMessage::Pong(_) => "PONG",
            ServerMessage::Error(_) => "ERROR",
        }
    }

    /// Timeline event carried by this frame, if any
    pub fn into_sync_event(self) -> Option<SyncEvent> {
        let event = match self {
            ServerMessage::StateSync(s) => SyncEvent::Joined(s),
            ServerMessage::SessionStart(s) => SyncEvent::SessionStarted(s),
            ServerMessage::Play(p) => SyncEvent::Play {
                track_index: p.track_index,
                position: p.position,
                reference_instant: p.reference_instant,
            },
            ServerMessage::Pause(p) => SyncEvent::Pause {
                track_index: p.track_index,
                position: p.position,
                reference_instant: p.reference_instant,
            },
            ServerMessage::Seek(p) => SyncEvent::Seek {
                track_index: p.track_index,
                position: p.position,
                playing: p.playing,
                reference_instant: p.reference_instant,
            },
            ServerMessage::TrackChange(p) => SyncEvent::TrackChanged {
                track_index: p.track_index,
                playing: p.playing,
                reference_instant: p.reference_instant,
            },
            ServerMessage::ParticipantCount(c) => SyncEvent::ParticipantCount(c.count),
            ServerMessage::SessionEnd(_) => SyncEvent::SessionEnded,
            ServerMessage::Pong(_) | ServerMessage::Error(_) => return None,
        };
        Some(event)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        decode(text)
    }
}

impl From<SyncEvent> for ServerMessage {
    fn from(event: SyncEvent) -> Self {
        match event {
            SyncEvent::Joined(s) => ServerMessage::StateSync(s),
            SyncEvent::SessionStarted(s) => ServerMessage::SessionStart(s),
            SyncEvent::Play {
                track_index,
                position,
                reference_instant,
            } => ServerMessage::Play(PlayPayload {
                track_index,
                position,
                reference_instant,
            }),
            SyncEvent::Pause {
                track_index,
                position,
                reference_instant,
            } => ServerMessage::Pause(PlayPayload {
                track_index,
                position,
                reference_instant,
            }),
            SyncEvent::Seek {
                track_index,
                position,
                playing,
                reference_instant,
            } => ServerMessage::Seek(SeekPayload {
                track_index,
                position,
                playing,
                reference_instant,
            }),
            SyncEvent::TrackChanged {
                track_index,
                playing,
                reference_instant,
            } => ServerMessage::TrackChange(TrackChangePayload {
                track_index,
                playing,
                reference_instant,
            }),
            SyncEvent::ParticipantCount(count) => {
                ServerMessage::ParticipantCount(CountPayload { count })
            }
            SyncEvent::SessionEnded => ServerMessage::SessionEnd(Empty {}),
        }
    }
}

/// Loosely typed frame used as the first decoding stage
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

fn payload<T: DeserializeOwned>(kind: &str, data: serde_json::Value) -> Result<T> {
    let data = if data.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        data
    };
    serde_json::from_value(data).map_err(|e| Error::Protocol(format!("invalid {} payload: {}", kind, e)))
}

fn decode<T: DeserializeOwned>(text: &str) -> Result<T> {
    Ok(serde_json::from_str(text)?)
}

impl TryFrom<Envelope> for ClientMessage {
    type Error = Error;

    fn try_from(env: Envelope) -> Result<Self> {
        let Envelope { kind, data } = env;
        let msg = match kind.as_str() {
            "JOIN" => ClientMessage::Join(payload(&kind, data)?),
            "PLAY" => ClientMessage::Play(payload(&kind, data)?),
            "PAUSE" => ClientMessage::Pause(payload(&kind, data)?),
            "SEEK" => ClientMessage::Seek(payload(&kind, data)?),
            "TRACK_CHANGE" => ClientMessage::TrackChange(payload(&kind, data)?),
            "SESSION_START" => ClientMessage::SessionStart(payload(&kind, data)?),
            "SESSION_END" => ClientMessage::SessionEnd(payload(&kind, data)?),
            "PING" => ClientMessage::Ping(payload(&kind, data)?),
            "GET_STATE" => ClientMessage::GetState(payload(&kind, data)?),
            other => return Err(Error::Protocol(format!("unknown message type: {}", other))),
        };
        Ok(msg)
    }
}

impl TryFrom<Envelope> for ServerMessage {
    type Error = Error;

    fn try_from(env: Envelope) -> Result<Self> {
        let Envelope { kind, data } = env;
        let msg = match kind.as_str() {
            "STATE_SYNC" => ServerMessage::StateSync(payload(&kind, data)?),
            "SESSION_START" => ServerMessage::SessionStart(payload(&kind, data)?),
            "PLAY" => ServerMessage::Play(payload(&kind, data)?),
            "PAUSE" => ServerMessage::Pause(payload(&kind, data)?),
            "SEEK" => ServerMessage::Seek(payload(&kind, data)?),
            "TRACK_CHANGE" => ServerMessage::TrackChange(payload(&kind, data)?),
            "PARTICIPANT_COUNT" => ServerMessage::ParticipantCount(payload(&kind, data)?),
            "SESSION_END" => ServerMessage::SessionEnd(payload(&kind, data)?),
            "PONG" => ServerMessage::Pong(payload(&kind, data)?),
            "ERROR" => ServerMessage::Error(payload(&kind, data)?),
            other => return Err(Error::Protocol(format!("unknown message type: {}", other))),
        };
        Ok(msg)
    }
}

impl<'de> Deserialize<'de> for ClientMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let env = Envelope::deserialize(deserializer)?;
        ClientMessage::try_from(env).map_err(serde::de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for ServerMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let env = Envelope::deserialize(deserializer)?;
        ServerMessage::try_from(env).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payloadless_frames_accept_missing_or_empty_data() {
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"PLAY"}"#).unwrap(),
            ClientMessage::Play(Empty {})
        );
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"PAUSE","data":{}}"#).unwrap(),
            ClientMessage::Pause(Empty {})
        );
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"SESSION_END","data":null}"#).unwrap(),
            ClientMessage::SessionEnd(Empty {})
        );
    }

    #[test]
    fn test_join_defaults_to_listener() {
        let msg = ClientMessage::from_json(r#"{"type":"JOIN","data":{}}"#).unwrap();
        assert_eq!(msg, ClientMessage::join(Role::Listener));

        let msg =
            ClientMessage::from_json(r#"{"type":"JOIN","data":{"role":"operator","programId":"hiit"}}"#)
                .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Join(JoinRequest {
                role: Role::Operator,
                program_id: Some("hiit".to_string()),
            })
        );
    }

    #[test]
    fn test_operator_frames_decode_camel_case_fields() {
        let msg = ClientMessage::from_json(r#"{"type":"TRACK_CHANGE","data":{"trackIndex":2}}"#).unwrap();
        assert_eq!(msg, ClientMessage::TrackChange(TrackChangeRequest { track_index: 2 }));

        let msg = ClientMessage::from_json(
            r#"{"type":"SESSION_START","data":{"name":"Class A","trackList":["x.mp3"]}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::SessionStart(req) => {
                assert_eq!(req.name, "Class A");
                assert_eq!(req.track_list, vec![TrackRef::new("x.mp3")]);
                assert!(req.cover_image.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_protocol_error() {
        let err = ClientMessage::from_json(r#"{"type":"DANCE","data":{}}"#).unwrap_err();
        assert!(matches!(err, Error::Protocol(ref m) if m.contains("DANCE")));
    }

    #[test]
    fn test_missing_required_field_is_protocol_error() {
        let err = ClientMessage::from_json(r#"{"type":"SEEK","data":{}}"#).unwrap_err();
        assert!(matches!(err, Error::Protocol(ref m) if m.contains("SEEK")));
    }

    #[test]
    fn test_server_frames_use_envelope_shape() {
        let now = Utc::now();
        let msg = ServerMessage::from(SyncEvent::ParticipantCount(4));
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "PARTICIPANT_COUNT", "data": {"count": 4}}));

        let msg = ServerMessage::from(SyncEvent::Play {
            track_index: 1,
            position: 12.5,
            reference_instant: now,
        });
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "PLAY");
        assert_eq!(value["data"]["position"], 12.5);
        assert_eq!(value["data"]["trackIndex"], 1);
        assert!(value["data"]["referenceInstant"].is_string());

        let value: serde_json::Value =
            serde_json::from_str(&ServerMessage::from(SyncEvent::SessionEnded).to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "SESSION_END", "data": {}}));
    }

    #[test]
    fn test_state_sync_carries_snapshot_fields() {
        let snapshot = SessionSnapshot {
            session_id: "s1".to_string(),
            track_index: 0,
            playing: true,
            position: 5.0,
            reference_instant: Utc::now(),
            participant_count: 2,
            display_name: Some("Class A".to_string()),
            cover_image: Some("cover.jpg".to_string()),
            track_list: vec![TrackRef::new("x.mp3")],
        };
        let text = ServerMessage::StateSync(snapshot.clone()).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        for field in [
            "trackIndex",
            "playing",
            "position",
            "referenceInstant",
            "participantCount",
            "displayName",
            "coverImage",
        ] {
            assert!(value["data"].get(field).is_some(), "missing {}", field);
        }

        let decoded = ServerMessage::from_json(&text).unwrap();
        assert_eq!(decoded.into_sync_event(), Some(SyncEvent::Joined(snapshot)));
    }

    #[test]
    fn test_unknown_error_code_still_decodes() {
        let msg = ServerMessage::from_json(r#"{"type":"ERROR","data":{"code":"RATE_LIMITED","message":"slow down"}}"#)
            .unwrap();
        assert_eq!(msg, ServerMessage::error(ErrorCode::Unknown, "slow down"));
        assert_eq!(msg.into_sync_event(), None);
    }
}
