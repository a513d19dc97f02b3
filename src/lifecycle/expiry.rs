//! Expiry/archival (spec §4.5, daily)
//!
//! For each memory with `expires_at < now`: policy `archive` sets
//! `archived_at` and hides it from non-administrative reads; policy
//! `delete` runs it through the same deletion path `DeleteMemory` uses.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ExpiryPolicy;
use crate::engine::MemoryEngine;
use crate::error::Result;
use crate::types::{AuditEntry, AuditStatus, Memory, MemoryConcept, MemoryFilter, MemoryId, SortOrder};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpiryCandidate {
    pub memory_id: MemoryId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpiryReport {
    pub candidates: Vec<ExpiryCandidate>,
    pub policy: Option<ExpiryPolicyKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpiryPolicyKind {
    Archive,
    Delete,
}

/// Finds expired memories across every tenant without mutating anything.
/// Administrative sweep, so it includes memories already hidden by other
/// lifecycle flags (`include_hidden`).
pub async fn dry_run(engine: &MemoryEngine) -> Result<ExpiryReport> {
    let now = chrono::Utc::now();
    let filter = MemoryFilter {
        include_hidden: true,
        ..Default::default()
    };
    let page = engine
        .record_store
        .query(&filter, SortOrder::CreatedAtDesc, usize::MAX, None)
        .await?;

    let candidates = page
        .items
        .into_iter()
        .filter(|m| m.expires_at.map(|e| e < now).unwrap_or(false) && m.archived_at.is_none())
        .map(|m| ExpiryCandidate { memory_id: m.id })
        .collect();

    let policy = Some(match engine.config.expiry.default_policy {
        ExpiryPolicy::Archive => ExpiryPolicyKind::Archive,
        ExpiryPolicy::Delete => ExpiryPolicyKind::Delete,
    });

    Ok(ExpiryReport { candidates, policy })
}

/// `ArchiveCategory(user_id, concept)` (spec §6): every not-yet-archived
/// memory under `concept`, regardless of `expires_at`. Unlike [`dry_run`]'s
/// TTL-driven sweep, the policy here is always `archive` — an explicit
/// category archive request isn't asking for deletion.
pub async fn dry_run_by_concept(engine: &MemoryEngine, user_id: &str, concept: MemoryConcept) -> Result<ExpiryReport> {
    let filter = MemoryFilter {
        user_id: Some(user_id.to_string()),
        memory_concept: Some(concept),
        include_hidden: true,
        ..Default::default()
    };
    let page = engine
        .record_store
        .query(&filter, SortOrder::CreatedAtDesc, usize::MAX, None)
        .await?;

    let candidates = page
        .items
        .into_iter()
        .filter(|m| m.archived_at.is_none())
        .map(|m| ExpiryCandidate { memory_id: m.id })
        .collect();

    Ok(ExpiryReport {
        candidates,
        policy: Some(ExpiryPolicyKind::Archive),
    })
}

pub async fn apply(engine: &MemoryEngine, report: &ExpiryReport) -> Result<()> {
    let policy = report.policy.unwrap_or(ExpiryPolicyKind::Archive);
    for candidate in &report.candidates {
        match policy {
            ExpiryPolicyKind::Archive => archive_one(engine, candidate.memory_id).await?,
            ExpiryPolicyKind::Delete => {
                // Destruction writes its own undo entry via the normal delete path.
                let _ = engine.delete_memory(candidate.memory_id).await;
            }
        }
    }
    Ok(())
}

async fn archive_one(engine: &MemoryEngine, memory_id: MemoryId) -> Result<()> {
    let Some(memory) = engine.record_store.get(memory_id).await? else {
        return Ok(());
    };
    if memory.archived_at.is_some() {
        return Ok(());
    }

    let updated = engine
        .record_store
        .update(
            memory_id,
            Box::new(|m: &mut Memory| {
                m.archived_at = Some(chrono::Utc::now());
                Ok(())
            }),
        )
        .await?;

    engine
        .audit_log
        .append(AuditEntry {
            log_id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            operation_type: "archive_memory".to_string(),
            agent_id: updated.agent_id.clone(),
            status: AuditStatus::Success,
            memory_id: Some(memory_id),
            undo_id: None,
            detail: Default::default(),
            execution_time_ms: 0.0,
            error_message: None,
        })
        .await?;

    Ok(())
}
