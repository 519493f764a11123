//! # sdsync Common Library
//!
//! Shared code for the session sync hub and its listener clients:
//! - Timeline State and the derived-position arithmetic
//! - Sync events (`SyncEvent`) and the `{ type, data }` wire envelope
//! - Configuration file resolution and loading
//! - Clock abstraction used for latency compensation
//! - Identifier helpers

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod time;
pub mod timeline;
pub mod wire;

pub use error::{Error, Result};
pub use events::{SessionSnapshot, SyncEvent};
pub use timeline::{TimelineState, TrackRef};
pub use wire::{ClientMessage, ServerMessage};
