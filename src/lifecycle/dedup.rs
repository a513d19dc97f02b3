//! Scheduled deduplication (spec §4.5)
//!
//! Unlike the inline dedup probe in [`crate::engine::write`] (exact/sibling
//! detection at add-time), this worker sweeps a tenant's existing memories
//! for near-duplicates that slipped past the add-time K=5 window and
//! proposes merges via the same dry-run -> approve -> apply flow as
//! summarization.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::MemoryEngine;
use crate::error::Result;
use crate::types::{
    AuditEntry, AuditStatus, Memory, MemoryFilter, MemoryId, SharePolicy, SortOrder, UndoEntry, UndoStatus,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupCandidate {
    /// The older of the pair; survives the merge.
    pub keep_id: MemoryId,
    /// The newer of the pair; deleted on apply.
    pub remove_id: MemoryId,
    pub similarity: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DedupReport {
    pub candidates: Vec<DedupCandidate>,
}

/// Never merge across different sessions unless both sides are explicitly
/// `share_policy = shared` (spec §4.5): a private note from one session
/// merging into a different session's memory would silently relocate it.
fn eligible_to_merge(a: &Memory, b: &Memory) -> bool {
    a.session_id == b.session_id || (matches!(a.share_policy, SharePolicy::Shared) && matches!(b.share_policy, SharePolicy::Shared))
}

/// Computes merge candidates without mutating anything.
pub async fn dry_run(engine: &MemoryEngine, user_id: &str) -> Result<DedupReport> {
    let filter = MemoryFilter {
        user_id: Some(user_id.to_string()),
        ..Default::default()
    };
    let page = engine
        .record_store
        .query(&filter, SortOrder::CreatedAtDesc, usize::MAX, None)
        .await?;

    let mut candidates = Vec::new();
    let mut merged: std::collections::HashSet<MemoryId> = std::collections::HashSet::new();

    for memory in &page.items {
        if merged.contains(&memory.id) {
            continue;
        }
        let embedding = engine.embedder.embed(&memory.text).await?;
        let neighbors = engine.vector_store.search(&embedding, 6).await?;
        for (candidate_id, score) in neighbors {
            if candidate_id == memory.id || merged.contains(&candidate_id) {
                continue;
            }
            if score < engine.config.dedup.threshold {
                continue;
            }
            let Some(other) = page.items.iter().find(|m| m.id == candidate_id) else {
                continue;
            };
            if !eligible_to_merge(memory, other) {
                continue;
            }
            let (keep, remove) = if memory.created_at <= other.created_at {
                (memory, other)
            } else {
                (other, memory)
            };
            candidates.push(DedupCandidate {
                keep_id: keep.id,
                remove_id: remove.id,
                similarity: score,
            });
            merged.insert(remove.id);
        }
    }

    Ok(DedupReport { candidates })
}

/// Applies a previously computed report: merges `facts`/`files` into the
/// survivor, rewrites graph edges, deletes the loser, and writes undo
/// entries sharing one `operation_chain_id` per merge (spec §4.5, §4.9).
pub async fn apply(engine: &MemoryEngine, report: &DedupReport) -> Result<()> {
    for candidate in &report.candidates {
        apply_one(engine, candidate).await?;
    }
    Ok(())
}

async fn apply_one(engine: &MemoryEngine, candidate: &DedupCandidate) -> Result<()> {
    let Some(survivor_before) = engine.record_store.get(candidate.keep_id).await? else {
        return Ok(());
    };
    let Some(loser) = engine.record_store.get(candidate.remove_id).await? else {
        return Ok(());
    };

    let survivor_before_state = serde_json::to_value(&survivor_before)?;
    let loser_state = serde_json::to_value(&loser)?;

    let survivor = engine
        .record_store
        .update(
            candidate.keep_id,
            Box::new({
                let files = loser.files.clone();
                let facts = loser.facts.clone();
                move |m: &mut Memory| {
                    for file in files {
                        if !m.files.contains(&file) {
                            m.files.push(file);
                        }
                    }
                    for fact in facts {
                        if !m.facts.contains(&fact) {
                            m.facts.push(fact);
                        }
                    }
                    m.updated_at = chrono::Utc::now();
                    Ok(())
                }
            }),
        )
        .await?;

    // Rewrite graph edges that pointed at the loser to point at the survivor.
    let (_, edges) = engine
        .graph_store
        .neighborhood(&candidate.remove_id.to_string(), 1, None)
        .await?;
    for edge in edges {
        engine
            .graph_store
            .merge_edge(&candidate.keep_id.to_string(), &edge.dst, &edge.edge_type, edge.props)
            .await?;
    }
    engine.graph_store.delete_node(&candidate.remove_id.to_string(), true).await?;
    engine.record_store.delete(candidate.remove_id).await?;
    engine.vector_store.delete(candidate.remove_id).await?;

    let operation_chain_id = Uuid::new_v4();
    let now = chrono::Utc::now();
    let retention_days = engine.config.undo.retention_days as i64;
    let survivor_undo_id = Uuid::new_v4();

    engine
        .audit_log
        .append(AuditEntry {
            log_id: Uuid::new_v4(),
            timestamp: now,
            operation_type: "dedup_merge".to_string(),
            agent_id: survivor.agent_id.clone(),
            status: AuditStatus::Success,
            memory_id: Some(candidate.keep_id),
            undo_id: Some(survivor_undo_id),
            detail: Default::default(),
            execution_time_ms: 0.0,
            error_message: None,
        })
        .await?;

    engine
        .undo_log
        .append(UndoEntry {
            undo_id: survivor_undo_id,
            operation_type: "dedup_merge".to_string(),
            agent_id: survivor.agent_id.clone(),
            original_state: survivor_before_state,
            new_state: serde_json::to_value(&survivor)?,
            memory_id: Some(candidate.keep_id),
            operation_chain_id: Some(operation_chain_id),
            status: UndoStatus::Pending,
            created_at: now,
            expires_at: now + chrono::Duration::days(retention_days),
        })
        .await?;

    engine
        .undo_log
        .append(UndoEntry {
            undo_id: Uuid::new_v4(),
            operation_type: "dedup_merge_delete".to_string(),
            agent_id: loser.agent_id.clone(),
            original_state: loser_state,
            new_state: serde_json::Value::Null,
            memory_id: Some(candidate.remove_id),
            operation_chain_id: Some(operation_chain_id),
            status: UndoStatus::Pending,
            created_at: now,
            expires_at: now + chrono::Duration::days(retention_days),
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::CancellationToken;
    use crate::types::CreateMemoryInput;

    fn input(text: &str) -> CreateMemoryInput {
        CreateMemoryInput {
            text: text.to_string(),
            agent_id: "a1".to_string(),
            user_id: "u1".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn near_duplicate_memories_are_merged_keeping_the_older() {
        let engine = MemoryEngine::builder(Config::default()).build();
        let older = engine
            .add_memory(input("Use JWT tokens for session auth"), CancellationToken::new())
            .await
            .unwrap();
        let newer = engine
            .add_memory(
                CreateMemoryInput {
                    skip_dedup: true,
                    ..input("Use JWT tokens for session auth")
                },
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_ne!(older.id, newer.id);

        let report = dry_run(&engine, "u1").await.unwrap();
        assert_eq!(report.candidates.len(), 1);
        assert_eq!(report.candidates[0].keep_id, older.id);

        apply(&engine, &report).await.unwrap();
        assert!(engine.record_store.get(newer.id).await.unwrap().is_none());
        assert!(engine.record_store.get(older.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn undo_of_merge_restores_the_sibling_and_removes_appended_facts() {
        let engine = MemoryEngine::builder(Config::default()).build();
        let older = engine
            .add_memory(
                CreateMemoryInput {
                    facts: Some(vec!["uses bcrypt".to_string()]),
                    ..input("Use JWT tokens for session auth")
                },
                CancellationToken::new(),
            )
            .await
            .unwrap();
        let newer = engine
            .add_memory(
                CreateMemoryInput {
                    skip_dedup: true,
                    facts: Some(vec!["rotates keys weekly".to_string()]),
                    ..input("Use JWT tokens for session auth")
                },
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let report = dry_run(&engine, "u1").await.unwrap();
        apply(&engine, &report).await.unwrap();

        let merged = engine.record_store.get(older.id).await.unwrap().unwrap();
        assert!(merged.facts.contains(&"rotates keys weekly".to_string()));

        let entries = engine
            .audit_log
            .query(&crate::journal::AuditFilter {
                memory_id: Some(older.id),
                operation_type: Some("dedup_merge".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        let undo_id = entries[0].undo_id.expect("dedup_merge entry carries an undo_id");

        engine.undo(undo_id).await.unwrap();

        let restored_survivor = engine.record_store.get(older.id).await.unwrap().unwrap();
        assert!(!restored_survivor.facts.contains(&"rotates keys weekly".to_string()));
        assert!(restored_survivor.facts.contains(&"uses bcrypt".to_string()));

        let restored_sibling = engine.record_store.get(newer.id).await.unwrap();
        assert!(restored_sibling.is_some());
    }

    #[tokio::test]
    async fn private_memories_from_different_sessions_are_not_merged() {
        let engine = MemoryEngine::builder(Config::default()).build();
        let session_a = uuid::Uuid::new_v4();
        let session_b = uuid::Uuid::new_v4();

        engine
            .add_memory(
                CreateMemoryInput {
                    session_id: Some(session_a),
                    ..input("Use JWT tokens for session auth")
                },
                CancellationToken::new(),
            )
            .await
            .unwrap();
        engine
            .add_memory(
                CreateMemoryInput {
                    session_id: Some(session_b),
                    skip_dedup: true,
                    ..input("Use JWT tokens for session auth")
                },
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let report = dry_run(&engine, "u1").await.unwrap();
        assert!(report.candidates.is_empty());
    }

    #[tokio::test]
    async fn shared_memories_from_different_sessions_can_still_merge() {
        use crate::types::SharePolicy;

        let engine = MemoryEngine::builder(Config::default()).build();
        let session_a = uuid::Uuid::new_v4();
        let session_b = uuid::Uuid::new_v4();

        engine
            .add_memory(
                CreateMemoryInput {
                    session_id: Some(session_a),
                    share_policy: Some(SharePolicy::Shared),
                    ..input("Use JWT tokens for session auth")
                },
                CancellationToken::new(),
            )
            .await
            .unwrap();
        engine
            .add_memory(
                CreateMemoryInput {
                    session_id: Some(session_b),
                    share_policy: Some(SharePolicy::Shared),
                    skip_dedup: true,
                    ..input("Use JWT tokens for session auth")
                },
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let report = dry_run(&engine, "u1").await.unwrap();
        assert_eq!(report.candidates.len(), 1);
    }
}
