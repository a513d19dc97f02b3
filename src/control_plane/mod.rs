//! Control plane: the Operational, Real-time, and gated Lifecycle groups of
//! the operation catalogue (spec §6) that sit above the engine's read/write
//! path rather than inside it — health, metrics, undo dispatch, scheduled
//! tasks, pending approvals, backup manifests, and live agent sync state.
//!
//! [`ControlPlane`] wraps one [`MemoryEngine`] the way the teacher's
//! `server.rs` wraps one `Storage`: a thin façade that owns the
//! process-lifetime registries (approvals, tasks, agent state, metrics)
//! the engine itself has no business holding, since those are operator
//! concerns rather than memory-write concerns.

pub mod approval;
pub mod metrics;
pub mod tasks;

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::MemoryEngine;
use crate::error::{MemoriaError, Result};
use crate::lifecycle::{backup, dedup, expiry, summarize};
use crate::realtime::SubscriptionId;
use crate::storage::HealthReport;
use crate::types::{Event, MemoryConcept, MemoryFilter, Requester, SharePolicy, UndoId, UpdateMemoryInput};

pub use approval::{ApprovalId, ApprovalQueue, PendingApproval, ProposedChange};
pub use metrics::{MetricsRecorder, PerformanceMetrics, SlowQuery, Stats};
pub use tasks::{ScheduledTask, TaskId, TaskKind, TaskRegistry};

/// `(user_id, source_agent, target_agent)` key for the last [`SyncRecord`]
/// `SyncAgentState` produced (spec §4.7).
type SyncKey = (String, String, String);

/// Outcome of a `SyncAgentState` call, as reported back by `GetSyncStatus`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRecord {
    pub memories_granted: usize,
    pub synced_at: DateTime<Utc>,
}

pub struct ControlPlane {
    pub engine: Arc<MemoryEngine>,
    pub approvals: ApprovalQueue,
    pub tasks: TaskRegistry,
    pub metrics: MetricsRecorder,
    backups: DashMap<(String, Uuid), backup::BackupManifest>,
    sync_log: DashMap<SyncKey, SyncRecord>,
    /// `user_id` -> the `operation_chain_id` of its most recent `RestoreBackup`,
    /// for `RollbackRestore` to undo.
    restore_log: DashMap<String, Uuid>,
}

impl ControlPlane {
    pub fn new(engine: Arc<MemoryEngine>) -> Self {
        ControlPlane {
            engine,
            approvals: ApprovalQueue::new(),
            tasks: TaskRegistry::new(),
            metrics: MetricsRecorder::new(),
            backups: DashMap::new(),
            sync_log: DashMap::new(),
            restore_log: DashMap::new(),
        }
    }

    /// Times an operation and records it in the rolling metrics window
    /// (spec §6 `GetPerformanceMetrics`/`GetSlowQueries`), regardless of
    /// whether it succeeded.
    pub async fn record<T>(
        &self,
        operation: &str,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        let started = std::time::Instant::now();
        let result = fut.await;
        self.metrics.record(operation, started.elapsed().as_secs_f64() * 1000.0);
        result
    }

    // ---- Operational group ----

    pub async fn health(&self) -> HealthReport {
        metrics::check_health(&self.engine).await
    }

    pub fn performance_metrics(&self) -> PerformanceMetrics {
        self.metrics.performance()
    }

    pub fn slow_queries(&self, limit: usize) -> Vec<SlowQuery> {
        self.metrics.slow_queries(limit)
    }

    pub fn prometheus_metrics(&self) -> String {
        self.metrics.to_prometheus()
    }

    /// `GetStats`: per-tenant memory/session counts alongside the
    /// process-wide operation counter.
    pub async fn stats(&self, user_id: &str) -> Result<Stats> {
        let filter = crate::types::MemoryFilter {
            user_id: Some(user_id.to_string()),
            ..Default::default()
        };
        let total_memories = self.engine.record_store.count(&filter).await?.max(0) as u64;
        let total_sessions = self
            .engine
            .session_store
            .list_active()
            .await?
            .into_iter()
            .filter(|s| s.user_id == user_id)
            .count() as u64;
        Ok(Stats {
            total_memories,
            total_sessions,
            total_operations: self.metrics.total_operations(),
        })
    }

    pub async fn undo(&self, undo_id: UndoId) -> Result<()> {
        self.engine.undo(undo_id).await
    }

    // ---- Gated lifecycle: dedup/summarize dry-run -> approve/reject -> apply ----

    /// Runs dry-run; if `require_approval`, parks the report and returns its
    /// [`ApprovalId`] instead of applying (spec §4.5). Otherwise applies
    /// immediately and returns `None`.
    pub async fn propose_dedup(&self, user_id: &str) -> Result<Option<ApprovalId>> {
        let report = dedup::dry_run(&self.engine, user_id).await?;
        if self.engine.config.dedup.require_approval {
            let pending = self.approvals.submit(user_id, ProposedChange::Dedup(report));
            Ok(Some(pending.approval_id))
        } else {
            dedup::apply(&self.engine, &report).await?;
            Ok(None)
        }
    }

    pub async fn propose_summarize(&self, user_id: &str) -> Result<Option<ApprovalId>> {
        let report = summarize::dry_run(&self.engine, user_id).await?;
        if self.engine.config.dedup.require_approval {
            let pending = self.approvals.submit(user_id, ProposedChange::Summarize(report));
            Ok(Some(pending.approval_id))
        } else {
            summarize::apply(&self.engine, &report).await?;
            Ok(None)
        }
    }

    /// `ArchiveCategory(user_id, concept)` (spec §6): archives every
    /// not-yet-archived memory under `concept` immediately, bypassing the
    /// TTL-driven expiry sweep and its approval gate (archiving on explicit
    /// request isn't the destructive half of lifecycle that gate exists for).
    pub async fn archive_category(&self, user_id: &str, concept: MemoryConcept) -> Result<usize> {
        let report = expiry::dry_run_by_concept(&self.engine, user_id, concept).await?;
        let count = report.candidates.len();
        expiry::apply(&self.engine, &report).await?;
        Ok(count)
    }

    /// `SummarizeCategory(user_id, concept)` (spec §6): same gate as
    /// `SummarizeOldMemories` since it mutates text the same way.
    pub async fn summarize_category(&self, user_id: &str, concept: MemoryConcept) -> Result<Option<ApprovalId>> {
        let report = summarize::dry_run_by_concept(&self.engine, user_id, concept).await?;
        if self.engine.config.dedup.require_approval {
            let pending = self.approvals.submit(user_id, ProposedChange::Summarize(report));
            Ok(Some(pending.approval_id))
        } else {
            summarize::apply(&self.engine, &report).await?;
            Ok(None)
        }
    }

    pub async fn approve(&self, approval_id: ApprovalId) -> Result<()> {
        let pending = self.approvals.take(approval_id)?;
        match pending.change {
            ProposedChange::Dedup(report) => dedup::apply(&self.engine, &report).await,
            ProposedChange::Summarize(report) => summarize::apply(&self.engine, &report).await,
        }
    }

    pub fn reject(&self, approval_id: ApprovalId) -> Result<()> {
        self.approvals.reject(approval_id)
    }

    pub fn list_approvals(&self, user_id: &str) -> Vec<PendingApproval> {
        self.approvals.list(user_id)
    }

    // ---- Backups ----

    pub async fn create_backup(&self, user_id: &str) -> Result<backup::BackupManifest> {
        let manifest = backup::create_manifest(&self.engine, user_id).await?;
        self.backups.insert((user_id.to_string(), manifest.backup_id), manifest.clone());
        Ok(manifest)
    }

    pub fn list_backups(&self, user_id: &str) -> Vec<backup::BackupManifest> {
        self.backups
            .iter()
            .filter(|entry| entry.key().0 == user_id)
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn get_backup(&self, user_id: &str, backup_id: Uuid) -> Result<backup::BackupManifest> {
        self.backups
            .get(&(user_id.to_string(), backup_id))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| MemoriaError::NotFound(format!("backup {} for {}", backup_id, user_id)))
    }

    /// Recomputes and compares the checksum of the most recently created
    /// backup for `user_id`.
    pub async fn verify_latest_backup(&self, user_id: &str) -> Result<bool> {
        let latest = self
            .backups
            .iter()
            .filter(|entry| entry.key().0 == user_id)
            .max_by_key(|entry| entry.value().created_at)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| MemoriaError::NotFound(format!("no backup recorded for {}", user_id)))?;
        backup::verify_manifest(&self.engine, &latest).await
    }

    /// `RestoreBackup(backup_id)`: replays the manifest's snapshot back onto
    /// the engine and remembers the resulting undo chain so `RollbackRestore`
    /// can reverse it.
    pub async fn restore_backup(&self, user_id: &str, backup_id: Uuid) -> Result<backup::RestoreReport> {
        let manifest = self.get_backup(user_id, backup_id)?;
        let report = backup::restore(&self.engine, &manifest).await?;
        self.restore_log.insert(user_id.to_string(), report.operation_chain_id);
        Ok(report)
    }

    /// `RollbackRestore`: undoes the most recent `RestoreBackup` for
    /// `user_id` via the same composite-undo path `Undo` uses.
    pub async fn rollback_restore(&self, user_id: &str) -> Result<()> {
        let (_, chain_id) = self
            .restore_log
            .remove(user_id)
            .ok_or_else(|| MemoriaError::NotFound(format!("no restore recorded for {}", user_id)))?;
        let chain = self.engine.undo_log.get_chain(chain_id).await?;
        let first = chain
            .first()
            .ok_or_else(|| MemoriaError::NotFound(format!("restore chain {} is empty", chain_id)))?;
        self.engine.undo(first.undo_id).await
    }

    // ---- Scheduled tasks ----

    pub fn schedule_task(&self, user_id: &str, kind: TaskKind, schedule_cron: &str) -> ScheduledTask {
        self.tasks.schedule(user_id, kind, schedule_cron)
    }

    pub fn list_tasks(&self, user_id: &str) -> Vec<ScheduledTask> {
        self.tasks.list(user_id)
    }

    pub fn cancel_task(&self, task_id: TaskId) -> Result<()> {
        self.tasks.cancel(task_id)
    }

    // ---- Real-time group ----

    pub async fn publish_memory_event(&self, event: Event) -> Result<()> {
        self.engine.realtime.publish(event).await
    }

    pub fn subscribe_memory_events(&self, channel_pattern: &str) -> (SubscriptionId, BoxStream<'static, Event>) {
        self.engine.realtime.subscribe(channel_pattern)
    }

    /// `SyncAgentState(source_agent, target_agent, filter)` (spec §4.7):
    /// copies `source_agent`'s memory references to `target_agent` through
    /// the sharing layer rather than handing over a data blob — each
    /// matched memory `target_agent` cannot already see is granted a
    /// `custom` share (widening an existing custom grant's `allowed_agents`
    /// in place, or converting `private`/`category_shared` into one naming
    /// `target_agent`). Already-`shared` memories need no grant and are
    /// skipped. Returns the number of memories granted.
    pub async fn sync_agent_state(
        &self,
        user_id: &str,
        source_agent: &str,
        target_agent: &str,
        mut filter: MemoryFilter,
    ) -> Result<usize> {
        filter.user_id = Some(user_id.to_string());
        filter.agent_id = Some(source_agent.to_string());
        let source_requester = Requester {
            user_id: user_id.to_string(),
            agent_id: source_agent.to_string(),
        };
        let target_requester = Requester {
            user_id: user_id.to_string(),
            agent_id: target_agent.to_string(),
        };

        let page = self.engine.list_memories(filter, &source_requester, usize::MAX, None).await?;

        let mut granted = 0;
        for memory in page.items {
            if self.engine.sharing.check_access(&memory, &target_requester).0 {
                continue;
            }
            let allowed_agents = match &memory.share_policy {
                SharePolicy::Custom { allowed_agents } => {
                    let mut allowed_agents = allowed_agents.clone();
                    allowed_agents.insert(target_agent.to_string());
                    allowed_agents
                }
                _ => BTreeSet::from([target_agent.to_string()]),
            };
            self.engine
                .update_memory(
                    memory.id,
                    UpdateMemoryInput {
                        share_policy: Some(SharePolicy::custom(allowed_agents)?),
                        ..Default::default()
                    },
                )
                .await?;
            granted += 1;
        }

        self.sync_log.insert(
            (user_id.to_string(), source_agent.to_string(), target_agent.to_string()),
            SyncRecord {
                memories_granted: granted,
                synced_at: Utc::now(),
            },
        );
        Ok(granted)
    }

    /// `GetSyncStatus`: the outcome of the most recent `SyncAgentState` call
    /// for this `(source_agent, target_agent)` pair, if any.
    pub fn sync_status(&self, user_id: &str, source_agent: &str, target_agent: &str) -> Option<SyncRecord> {
        self.sync_log
            .get(&(user_id.to_string(), source_agent.to_string(), target_agent.to_string()))
            .map(|entry| entry.value().clone())
    }
}
