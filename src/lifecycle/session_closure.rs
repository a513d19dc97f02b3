//! Stale session closure (spec §4.5, hourly; §3 "a session inactive for
//! > 24h is auto-closed by a lifecycle worker")

use crate::engine::MemoryEngine;
use crate::error::Result;
use crate::types::SessionId;

/// Closes every active session idle past `session.idle_timeout_min`
/// (spec §6, default 1440 minutes). No dry-run phase: closing a session
/// has no undo-able effect worth staging (spec §4.5 lists only dedup and
/// summarization as requiring approval).
pub async fn run(engine: &MemoryEngine) -> Result<Vec<SessionId>> {
    let idle_timeout = chrono::Duration::minutes(engine.config.session.idle_timeout_min);
    let now = chrono::Utc::now();

    let mut closed = Vec::new();
    for session in engine.session_store.list_active().await? {
        if now - session.start_time >= idle_timeout {
            engine.end_session(session.session_id).await?;
            closed.push(session.session_id);
        }
    }
    Ok(closed)
}
