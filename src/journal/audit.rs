//! Append-only audit log (spec §3, §4.9)
//!
//! Generalizes the teacher's `storage::audit` module (SQLite-rowid-keyed
//! `AuditEntry`/`query_audit_log`) to UUID ids and adds `retention_days`
//! pruning per spec §6 (`audit.retention_days` [90]).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::types::{AuditEntry, AuditId, MemoryId};

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub agent_id: Option<String>,
    pub memory_id: Option<MemoryId>,
    pub operation_type: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

fn matches(entry: &AuditEntry, filter: &AuditFilter) -> bool {
    if let Some(ref agent_id) = filter.agent_id {
        if &entry.agent_id != agent_id {
            return false;
        }
    }
    if let Some(memory_id) = filter.memory_id {
        if entry.memory_id != Some(memory_id) {
            return false;
        }
    }
    if let Some(ref op) = filter.operation_type {
        if &entry.operation_type != op {
            return false;
        }
    }
    if let Some(since) = filter.since {
        if entry.timestamp < since {
            return false;
        }
    }
    true
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> Result<()>;
    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>>;
    /// Deletes entries older than `retention_days`; returns the count removed.
    async fn prune(&self, retention_days: u32) -> Result<u64>;
}

#[derive(Default)]
pub struct InMemoryAuditLog {
    entries: RwLock<BTreeMap<(DateTime<Utc>, AuditId), AuditEntry>>,
    by_id: DashMap<AuditId, (DateTime<Utc>, AuditId)>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn append(&self, entry: AuditEntry) -> Result<()> {
        let key = (entry.timestamp, entry.log_id);
        self.by_id.insert(entry.log_id, key);
        self.entries.write().insert(key, entry);
        Ok(())
    }

    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        let entries = self.entries.read();
        let mut matched: Vec<AuditEntry> = entries
            .values()
            .rev()
            .filter(|entry| matches(entry, filter))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(matched)
    }

    async fn prune(&self, retention_days: u32) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
        let mut entries = self.entries.write();
        let stale: Vec<_> = entries
            .keys()
            .filter(|(timestamp, _)| *timestamp < cutoff)
            .cloned()
            .collect();
        for key in &stale {
            entries.remove(key);
            self.by_id.remove(&key.1);
        }
        Ok(stale.len() as u64)
    }
}
