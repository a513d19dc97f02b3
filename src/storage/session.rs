//! Session store (spec §3 "Session", §4.5 stale-session closure)
//!
//! Not one of the four spec §4.1 storage-adapter capabilities (those cover
//! memories); sessions are a lighter-weight entity the engine and the
//! stale-session-closure lifecycle worker both need a shared view of.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{MemoriaError, Result};
use crate::types::{Session, SessionId};

pub type SessionPatch = Box<dyn FnOnce(&mut Session) -> Result<()> + Send>;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn put(&self, session: Session) -> Result<()>;
    async fn get(&self, id: SessionId) -> Result<Option<Session>>;
    async fn update(&self, id: SessionId, patch: SessionPatch) -> Result<Session>;
    /// Sessions with no `end_time`, for the stale-session-closure worker.
    async fn list_active(&self) -> Result<Vec<Session>>;
    /// A user's sessions, for `ListRecentSessions`. No ordering guarantee;
    /// callers sort by `start_time`.
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Session>>;
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<SessionId, Session>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn put(&self, session: Session) -> Result<()> {
        self.sessions.insert(session.session_id, session);
        Ok(())
    }

    async fn get(&self, id: SessionId) -> Result<Option<Session>> {
        Ok(self.sessions.get(&id).map(|s| s.clone()))
    }

    async fn update(&self, id: SessionId, patch: SessionPatch) -> Result<Session> {
        let mut session = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| MemoriaError::NotFound(format!("session {}", id)))?;
        patch(&mut session)?;
        Ok(session.clone())
    }

    async fn list_active(&self) -> Result<Vec<Session>> {
        Ok(self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_active())
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Session>> {
        Ok(self
            .sessions
            .iter()
            .filter(|entry| entry.value().user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect())
    }
}
