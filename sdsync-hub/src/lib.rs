//! sdsync-hub library - session sync hub
//!
//! Keeps one authoritative timeline per session and fans operator actions out
//! to every connected listener over WebSocket.

use std::sync::Arc;

use axum::Router;
use sdsync_common::time::{Clock, SystemClock};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod adapter;
pub mod api;
pub mod catalog;
pub mod config;
pub mod error;
pub mod hub;
pub mod notifications;
pub mod reaper;
pub mod registry;
pub mod session;
pub mod ws;

pub use config::HubConfig;
pub use error::{HubError, HubResult};
pub use hub::Hub;

use catalog::StaticCatalog;
use notifications::Notifier;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub config: Arc<HubConfig>,
}

impl AppState {
    /// State with a catalog built from the config's `[[programs]]` table
    pub fn new(config: HubConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: HubConfig, clock: Arc<dyn Clock>) -> Self {
        let catalog = StaticCatalog::from_programs(&config.programs);
        let hub = Hub::new(Arc::new(catalog), clock, Notifier::default());
        Self {
            hub: Arc::new(hub),
            config: Arc::new(config),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    let api = Router::new()
        .route(
            "/sessions",
            get(api::sessions::list_sessions).post(api::sessions::create_session),
        )
        .route("/sessions/:session_id", get(api::sessions::get_session))
        .route("/active-sessions", get(api::sessions::active_sessions))
        .route("/events", get(api::events::event_stream));

    Router::new()
        .nest("/api/v1", api)
        .route("/ws/session/:session_id", get(ws::ws_handler))
        .route("/api/ws/session/:session_id", get(ws::ws_handler))
        .merge(api::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
