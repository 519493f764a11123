//! Session inspection and creation endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use sdsync_common::SessionSnapshot;

use crate::error::HubResult;
use crate::hub::SessionSummary;
use crate::notifications::ActiveSession;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub id: Option<String>,
    pub program_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSessionsResponse {
    pub active_sessions: Vec<ActiveSession>,
    pub has_active: bool,
}

/// GET /api/v1/sessions
pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    Json(state.hub.summaries().await)
}

/// GET /api/v1/sessions/:session_id
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> HubResult<Json<SessionSummary>> {
    Ok(Json(state.hub.summary(&session_id).await?))
}

/// POST /api/v1/sessions
pub async fn create_session(
    State(state): State<AppState>,
    body: Option<Json<CreateSessionRequest>>,
) -> HubResult<(StatusCode, Json<SessionSnapshot>)> {
    let Json(request) = body.unwrap_or_default();
    let snapshot = state
        .hub
        .create_session(request.id, request.program_id)
        .await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

/// GET /api/v1/active-sessions
///
/// Sessions whose operator has sent SESSION_START.
pub async fn active_sessions(State(state): State<AppState>) -> Json<ActiveSessionsResponse> {
    let active = state.hub.active_sessions().await;
    Json(ActiveSessionsResponse {
        has_active: !active.is_empty(),
        active_sessions: active,
    })
}
