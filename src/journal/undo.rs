//! Undo log (spec §3, §4.9)
//!
//! Stores reversible-operation records; the actual reversal (restoring
//! RecordStore/VectorStore/GraphStore state and publishing a compensating
//! event) is orchestrated by [`crate::engine`], which has handles to those
//! stores. This module only owns the log itself.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{MemoriaError, Result};
use crate::types::{UndoEntry, UndoId, UndoStatus};

#[async_trait]
pub trait UndoLog: Send + Sync {
    async fn append(&self, entry: UndoEntry) -> Result<()>;
    async fn get(&self, undo_id: UndoId) -> Result<UndoEntry>;
    async fn set_status(&self, undo_id: UndoId, status: UndoStatus) -> Result<()>;
    /// All entries sharing an `operation_chain_id` (composite undo, spec §4.9).
    async fn get_chain(&self, operation_chain_id: uuid::Uuid) -> Result<Vec<UndoEntry>>;
}

#[derive(Default)]
pub struct InMemoryUndoLog {
    entries: DashMap<UndoId, UndoEntry>,
}

impl InMemoryUndoLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UndoLog for InMemoryUndoLog {
    async fn append(&self, entry: UndoEntry) -> Result<()> {
        self.entries.insert(entry.undo_id, entry);
        Ok(())
    }

    async fn get(&self, undo_id: UndoId) -> Result<UndoEntry> {
        self.entries
            .get(&undo_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| MemoriaError::NotFound(format!("undo entry {}", undo_id)))
    }

    async fn set_status(&self, undo_id: UndoId, status: UndoStatus) -> Result<()> {
        let mut entry = self
            .entries
            .get_mut(&undo_id)
            .ok_or_else(|| MemoriaError::NotFound(format!("undo entry {}", undo_id)))?;
        entry.status = status;
        Ok(())
    }

    async fn get_chain(&self, operation_chain_id: uuid::Uuid) -> Result<Vec<UndoEntry>> {
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.operation_chain_id == Some(operation_chain_id))
            .map(|entry| entry.clone())
            .collect())
    }
}

/// `Undo(u)` fails with `NotFound` once `u.expires_at < now` (spec §8).
pub fn check_not_expired(entry: &UndoEntry) -> Result<()> {
    if entry.expires_at < chrono::Utc::now() {
        return Err(MemoriaError::NotFound(format!(
            "undo entry {} expired at {}",
            entry.undo_id, entry.expires_at
        )));
    }
    if entry.status != UndoStatus::Pending {
        return Err(MemoriaError::Conflict(format!(
            "undo entry {} already {:?}",
            entry.undo_id, entry.status
        )));
    }
    Ok(())
}
