//! Identifier utilities

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-connection opaque identifier
///
/// Assigned by the hub when a socket opens. Listener and operator handles are
/// referenced by this id from a session's membership set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh connection id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable
        let s = self.0.simple().to_string();
        write!(f, "{}", &s[..8])
    }
}

/// Generate a server-assigned session identifier
pub fn generate_session_id() -> String {
    Uuid::new_v4().simple().to_string()
}
