//! Session Registry
//!
//! Map from session id to session. The map itself sits behind a short-lived
//! `RwLock` that is never held across an await; each session has its own
//! `tokio::sync::Mutex`, so unrelated sessions never contend.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use sdsync_common::ids::generate_session_id;
use tokio::sync::Mutex;

use crate::error::{HubError, HubResult};
use crate::session::{Session, SessionMeta};

pub type SharedSession = Arc<Mutex<Session>>;

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SharedSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session; a server id is generated when `id` is `None`
    pub fn create(
        &self,
        id: Option<String>,
        meta: SessionMeta,
        now: DateTime<Utc>,
    ) -> HubResult<(String, SharedSession)> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let id = match id {
            Some(id) if sessions.contains_key(&id) => return Err(HubError::AlreadyExists(id)),
            Some(id) => id,
            None => loop {
                let candidate = generate_session_id();
                if !sessions.contains_key(&candidate) {
                    break candidate;
                }
            },
        };

        let session = Arc::new(Mutex::new(Session::new(id.clone(), meta, now)));
        sessions.insert(id.clone(), Arc::clone(&session));
        Ok((id, session))
    }

    /// Existing session, or a new one built from `meta` (the flag is `true` when created)
    pub fn get_or_create(
        &self,
        id: &str,
        meta: impl FnOnce() -> SessionMeta,
        now: DateTime<Utc>,
    ) -> (SharedSession, bool) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        if let Some(session) = sessions.get(id) {
            return (Arc::clone(session), false);
        }
        let session = Arc::new(Mutex::new(Session::new(id, meta(), now)));
        sessions.insert(id.to_string(), Arc::clone(&session));
        (session, true)
    }

    pub fn get(&self, id: &str) -> HubResult<SharedSession> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| HubError::SessionNotFound(id.to_string()))
    }

    pub fn remove(&self, id: &str) -> Option<SharedSession> {
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
    }

    /// Remove `id` only if it still maps to `session`
    pub fn remove_if_same(&self, id: &str, session: &SharedSession) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        match sessions.get(id) {
            Some(current) if Arc::ptr_eq(current, session) => {
                sessions.remove(id);
                true
            }
            _ => false,
        }
    }

    /// All sessions, sorted by id
    pub fn all(&self) -> Vec<(String, SharedSession)> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<_> = sessions
            .iter()
            .map(|(id, s)| (id.clone(), Arc::clone(s)))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
