//! Global notification feed
//!
//! Session lifecycle and participant-count notices for clients that have not
//! joined any session (landing pages, dashboards). Delivered over SSE by
//! [`crate::api::events`].

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

/// Summary of a started session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSession {
    pub session_id: String,
    pub display_name: Option<String>,
    pub cover_image: Option<String>,
    pub playing: bool,
    pub participant_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Notice {
    /// First notice on a new feed when at least one session is started
    SessionActive { sessions: Vec<ActiveSession> },

    /// First notice on a new feed when nothing is running
    NoActiveSession {},

    #[serde(rename_all = "camelCase")]
    SessionStart {
        session_id: String,
        display_name: Option<String>,
        cover_image: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    SessionEnd { session_id: String },

    #[serde(rename_all = "camelCase")]
    ParticipantCount { session_id: String, count: usize },
}

impl Notice {
    pub fn event_type(&self) -> &'static str {
        match self {
            Notice::SessionActive { .. } => "SESSION_ACTIVE",
            Notice::NoActiveSession {} => "NO_ACTIVE_SESSION",
            Notice::SessionStart { .. } => "SESSION_START",
            Notice::SessionEnd { .. } => "SESSION_END",
            Notice::ParticipantCount { .. } => "PARTICIPANT_COUNT",
        }
    }

    /// Feed greeting for the current set of started sessions
    pub fn greeting(sessions: Vec<ActiveSession>) -> Self {
        if sessions.is_empty() {
            Notice::NoActiveSession {}
        } else {
            Notice::SessionActive { sessions }
        }
    }
}

/// Broadcast channel for [`Notice`]s
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notice>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to all current subscribers; no subscribers is fine
    pub fn publish(&self, notice: Notice) {
        trace!("Notice {}", notice.event_type());
        let _ = self.tx.send(notice);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notice_serialization() {
        let notice = Notice::ParticipantCount {
            session_id: "s1".to_string(),
            count: 3,
        };
        assert_eq!(
            serde_json::to_value(&notice).unwrap(),
            json!({"type": "PARTICIPANT_COUNT", "data": {"sessionId": "s1", "count": 3}})
        );
        assert_eq!(
            serde_json::to_value(Notice::greeting(vec![])).unwrap(),
            json!({"type": "NO_ACTIVE_SESSION", "data": {}})
        );
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let notifier = Notifier::default();
        notifier.publish(Notice::NoActiveSession {});

        let mut rx = notifier.subscribe();
        assert_eq!(notifier.subscriber_count(), 1);
        notifier.publish(Notice::SessionEnd {
            session_id: "s1".to_string(),
        });
        assert_eq!(rx.recv().await.unwrap().event_type(), "SESSION_END");
    }
}
