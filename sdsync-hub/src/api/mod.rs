//! HTTP API handlers for sdsync-hub

pub mod events;
pub mod health;
pub mod sessions;

pub use health::health_routes;
