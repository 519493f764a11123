//! Server-Sent Events (SSE) notification feed
//!
//! Streams events:
//! - SESSION_ACTIVE / NO_ACTIVE_SESSION (once, on connect)
//! - SESSION_START, SESSION_END
//! - PARTICIPANT_COUNT

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use crate::notifications::Notice;
use crate::AppState;

fn to_event(notice: &Notice) -> Option<Event> {
    match serde_json::to_string(notice) {
        Ok(json) => Some(Event::default().event(notice.event_type()).data(json)),
        Err(e) => {
            warn!("Failed to serialize notice: {}", e);
            None
        }
    }
}

/// GET /api/v1/events
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("New SSE client connected");

    // Subscribe before building the greeting so nothing published in between is lost
    let rx = state.hub.notifier().subscribe();
    let greeting = Notice::greeting(state.hub.active_sessions().await);

    let updates = BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(notice) => to_event(&notice).map(Ok::<Event, Infallible>),
            Err(e) => {
                // Lagged receivers skip ahead
                warn!("SSE stream error: {:?}", e);
                None
            }
        }
    });

    let stream = stream::iter(to_event(&greeting).map(Ok::<Event, Infallible>)).chain(updates);

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
