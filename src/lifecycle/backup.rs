//! Backup, verification, and restore (spec §4.5, periodic; §6 `CreateBackup`/
//! `VerifyBackup`/`RestoreBackup`/`RollbackRestore`)
//!
//! A manifest is a full point-in-time snapshot of one tenant's memories plus
//! a checksum over it, cheap enough to keep in memory at this crate's scale.
//! `verify_manifest` recomputes the checksum against the live store and
//! flags drift; `restore` replays the snapshot's rows back onto the store
//! and journals the change through the same undo machinery `UpdateMemory`
//! uses, so `RollbackRestore` is just `MemoryEngine::undo` against the
//! restore's `operation_chain_id` rather than a second restore mechanism.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::engine::MemoryEngine;
use crate::error::Result;
use crate::types::{
    AuditEntry, AuditStatus, Event, EventType, Memory, MemoryFilter, SortOrder, UndoEntry, UndoStatus,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupManifest {
    pub backup_id: Uuid,
    pub user_id: String,
    pub memory_count: usize,
    pub checksum: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Full snapshot of the tenant's memories at `created_at`, restored
    /// verbatim by [`restore`].
    pub memories: Vec<Memory>,
}

/// Outcome of a [`restore`] call; `operation_chain_id` is what
/// `RollbackRestore` undoes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RestoreReport {
    pub restored: usize,
    pub operation_chain_id: Uuid,
}

/// Deterministic checksum over sorted `(id, updated_at)` pairs, cheap to
/// recompute and sufficient to detect silent corruption or drift.
fn compute_checksum(mut rows: Vec<(uuid::Uuid, chrono::DateTime<chrono::Utc>)>) -> String {
    rows.sort();
    let mut hasher = Sha256::new();
    for (id, updated_at) in rows {
        hasher.update(id.as_bytes());
        hasher.update(updated_at.to_rfc3339().as_bytes());
    }
    hex::encode(hasher.finalize())
}

pub async fn create_manifest(engine: &MemoryEngine, user_id: &str) -> Result<BackupManifest> {
    let filter = MemoryFilter {
        user_id: Some(user_id.to_string()),
        include_hidden: true,
        ..Default::default()
    };
    let page = engine
        .record_store
        .query(&filter, SortOrder::CreatedAtDesc, usize::MAX, None)
        .await?;

    let rows: Vec<_> = page.items.iter().map(|m| (m.id, m.updated_at)).collect();
    Ok(BackupManifest {
        backup_id: Uuid::new_v4(),
        user_id: user_id.to_string(),
        memory_count: rows.len(),
        checksum: compute_checksum(rows),
        created_at: chrono::Utc::now(),
        memories: page.items,
    })
}

/// Recomputes the checksum over the current store and compares it against
/// the manifest's. A mismatch publishes `backup_bad` (modeled as a
/// `memory_updated`-shaped event carrying `{"kind": "backup_bad"}`, since
/// spec §3's `EventType` closed set has no dedicated variant for it).
pub async fn verify_manifest(engine: &MemoryEngine, manifest: &BackupManifest) -> Result<bool> {
    let current = create_manifest(engine, &manifest.user_id).await?;
    let ok = current.checksum == manifest.checksum && current.memory_count == manifest.memory_count;

    if !ok {
        engine
            .realtime
            .publish(Event {
                event_type: EventType::MemoryUpdated,
                memory_id: None,
                session_id: None,
                agent_id: String::new(),
                user_id: manifest.user_id.clone(),
                timestamp: chrono::Utc::now(),
                data: serde_json::json!({ "kind": "backup_bad", "expected_checksum": manifest.checksum }),
            })
            .await?;
    }

    Ok(ok)
}

/// `RestoreBackup(backup_id)`: replays every row in `manifest` back onto the
/// RecordStore/VectorStore, one `UndoEntry` per memory sharing a single
/// `operation_chain_id` (spec §4.9's composite-undo shape, the same one
/// [`crate::lifecycle::dedup::apply_one`] uses for a merge). A memory absent
/// from the live store before the restore gets `original_state = null`, so
/// undoing the restore deletes it again exactly like undoing an `AddMemory`.
pub async fn restore(engine: &MemoryEngine, manifest: &BackupManifest) -> Result<RestoreReport> {
    let operation_chain_id = Uuid::new_v4();
    let now = chrono::Utc::now();
    let retention_days = engine.config.undo.retention_days as i64;

    for memory in &manifest.memories {
        let before = engine.record_store.get(memory.id).await?;
        let before_state = match &before {
            Some(existing) => serde_json::to_value(existing)?,
            None => serde_json::Value::Null,
        };

        engine.record_store.put(memory.clone()).await?;
        if memory.has_vector {
            if let Ok(embedding) = engine.embedder.embed(&memory.text).await {
                let _ = engine
                    .vector_store
                    .upsert(memory.id, embedding, serde_json::json!({ "user_id": memory.user_id }))
                    .await;
            }
        }

        let undo_id = Uuid::new_v4();
        engine
            .audit_log
            .append(AuditEntry {
                log_id: Uuid::new_v4(),
                timestamp: now,
                operation_type: "restore_backup".to_string(),
                agent_id: memory.agent_id.clone(),
                status: AuditStatus::Success,
                memory_id: Some(memory.id),
                undo_id: Some(undo_id),
                detail: Default::default(),
                execution_time_ms: 0.0,
                error_message: None,
            })
            .await?;

        engine
            .undo_log
            .append(UndoEntry {
                undo_id,
                operation_type: "restore_backup".to_string(),
                agent_id: memory.agent_id.clone(),
                original_state: before_state,
                new_state: serde_json::to_value(memory)?,
                memory_id: Some(memory.id),
                operation_chain_id: Some(operation_chain_id),
                status: UndoStatus::Pending,
                created_at: now,
                expires_at: now + chrono::Duration::days(retention_days),
            })
            .await?;
    }

    Ok(RestoreReport {
        restored: manifest.memories.len(),
        operation_chain_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::CancellationToken;
    use crate::types::{CreateMemoryInput, Requester, UpdateMemoryInput};

    #[tokio::test]
    async fn manifest_verifies_clean_against_unchanged_store() {
        let engine = MemoryEngine::builder(Config::default()).build();
        engine
            .add_memory(
                CreateMemoryInput {
                    text: "first".into(),
                    agent_id: "a1".into(),
                    user_id: "u1".into(),
                    ..Default::default()
                },
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let manifest = create_manifest(&engine, "u1").await.unwrap();
        assert!(verify_manifest(&engine, &manifest).await.unwrap());
    }

    #[tokio::test]
    async fn manifest_flags_mismatch_after_new_write() {
        let engine = MemoryEngine::builder(Config::default()).build();
        engine
            .add_memory(
                CreateMemoryInput {
                    text: "first".into(),
                    agent_id: "a1".into(),
                    user_id: "u1".into(),
                    ..Default::default()
                },
                CancellationToken::new(),
            )
            .await
            .unwrap();
        let manifest = create_manifest(&engine, "u1").await.unwrap();

        engine
            .add_memory(
                CreateMemoryInput {
                    text: "second, unrelated note".into(),
                    agent_id: "a1".into(),
                    user_id: "u1".into(),
                    ..Default::default()
                },
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!verify_manifest(&engine, &manifest).await.unwrap());
    }

    #[tokio::test]
    async fn restore_reverts_a_later_edit_and_rollback_reverts_the_restore() {
        let engine = MemoryEngine::builder(Config::default()).build();
        let memory = engine
            .add_memory(
                CreateMemoryInput {
                    text: "original text".into(),
                    agent_id: "a1".into(),
                    user_id: "u1".into(),
                    ..Default::default()
                },
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let manifest = create_manifest(&engine, "u1").await.unwrap();

        engine
            .update_memory(
                memory.id,
                UpdateMemoryInput {
                    text: Some("edited after backup".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let report = restore(&engine, &manifest).await.unwrap();
        assert_eq!(report.restored, 1);

        let requester = Requester {
            user_id: "u1".into(),
            agent_id: "a1".into(),
        };
        let restored = engine.get_memory(memory.id, &requester).await.unwrap();
        assert_eq!(restored.text, "original text");

        let chain = engine.undo_log.get_chain(report.operation_chain_id).await.unwrap();
        engine.undo(chain[0].undo_id).await.unwrap();

        let rolled_back = engine.get_memory(memory.id, &requester).await.unwrap();
        assert_eq!(rolled_back.text, "edited after backup");
    }
}
