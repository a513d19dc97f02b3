//! Session lifecycle operations (spec §3 "Session")

use chrono::Utc;
use uuid::Uuid;

use crate::error::{MemoriaError, Result};
use crate::types::{Event, EventType, Memory, Requester, Session, SessionId};

use super::MemoryEngine;

/// A session plus its memory timeline, for `GetSessionContext`.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session: Session,
    pub memories: Vec<Memory>,
}

impl MemoryEngine {
    pub async fn start_session(&self, user_id: String, agent_id: String) -> Result<Session> {
        let session = Session {
            session_id: Uuid::new_v4(),
            user_id: user_id.clone(),
            agent_id: agent_id.clone(),
            start_time: Utc::now(),
            end_time: None,
            summary: None,
            metadata: Default::default(),
        };
        self.session_store.put(session.clone()).await?;

        self.realtime
            .publish(Event {
                event_type: EventType::SessionStarted,
                memory_id: None,
                session_id: Some(session.session_id),
                agent_id,
                user_id,
                timestamp: Utc::now(),
                data: serde_json::json!({}),
            })
            .await?;

        Ok(session)
    }

    /// Ends a session that is still active; a no-op rejection if it has
    /// already been closed (spec §3 invariant: `end_time >= start_time` or absent).
    pub async fn end_session(&self, session_id: SessionId) -> Result<Session> {
        let closed = self
            .session_store
            .update(
                session_id,
                Box::new(|s: &mut Session| {
                    if s.end_time.is_some() {
                        return Err(MemoriaError::Conflict(format!("session {} already ended", s.session_id)));
                    }
                    s.end_time = Some(Utc::now());
                    Ok(())
                }),
            )
            .await?;

        self.realtime
            .publish(Event {
                event_type: EventType::SessionEnded,
                memory_id: None,
                session_id: Some(session_id),
                agent_id: closed.agent_id.clone(),
                user_id: closed.user_id.clone(),
                timestamp: Utc::now(),
                data: serde_json::json!({}),
            })
            .await?;

        Ok(closed)
    }

    pub async fn get_session(&self, session_id: SessionId) -> Result<Session> {
        self.session_store
            .get(session_id)
            .await?
            .ok_or_else(|| MemoriaError::NotFound(format!("session {}", session_id)))
    }

    /// `GetSessionContext` (spec §6): the session plus the memories it
    /// contains, ordered the same way `GetTimeline` orders them.
    pub async fn get_session_context(&self, session_id: SessionId, requester: &Requester) -> Result<SessionContext> {
        let session = self.get_session(session_id).await?;
        let memories = self.get_timeline(session_id, requester).await?;
        Ok(SessionContext { session, memories })
    }

    /// `ListRecentSessions(user_id, limit)` (spec §6): a user's sessions,
    /// most recently started first.
    pub async fn list_recent_sessions(&self, user_id: &str, limit: usize) -> Result<Vec<Session>> {
        let mut sessions = self.session_store.list_for_user(user_id).await?;
        sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        sessions.truncate(limit);
        Ok(sessions)
    }
}
