//! RecordStore capability (spec §4.1)

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::error::{MemoriaError, Result};
use crate::types::{Cursor, Memory, MemoryFilter, MemoryId, Page, SortOrder};

/// Partial update applied atomically under the store's per-id serialization.
///
/// Mirrors `UpdateMemoryInput` at the engine layer but operates on the
/// already-loaded `Memory` so the adapter can apply it under a single
/// read-modify-write without re-parsing engine-level intent.
pub type RecordPatch = Box<dyn FnOnce(&mut Memory) -> Result<()> + Send>;

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn put(&self, memory: Memory) -> Result<()>;
    async fn get(&self, id: MemoryId) -> Result<Option<Memory>>;
    async fn update(&self, id: MemoryId, patch: RecordPatch) -> Result<Memory>;
    async fn delete(&self, id: MemoryId) -> Result<()>;
    async fn query(
        &self,
        filter: &MemoryFilter,
        order: SortOrder,
        limit: usize,
        cursor: Option<&Cursor>,
    ) -> Result<Page<Memory>>;
    async fn bulk_get(&self, ids: &[MemoryId]) -> Result<Vec<Memory>>;
    async fn count(&self, filter: &MemoryFilter) -> Result<i64>;
    /// Cheap liveness probe for the `Health` operation (spec §6); adapters
    /// backed by a real connection should override this to ping it.
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

pub(crate) fn matches_filter(memory: &Memory, filter: &MemoryFilter) -> bool {
    if !filter.include_hidden && !memory.is_read_visible_lifecycle(chrono::Utc::now()) {
        return false;
    }
    if let Some(ref user_id) = filter.user_id {
        if &memory.user_id != user_id {
            return false;
        }
    }
    if let Some(ref agent_id) = filter.agent_id {
        if &memory.agent_id != agent_id {
            return false;
        }
    }
    if let Some(memory_type) = filter.memory_type {
        if memory.memory_type != memory_type {
            return false;
        }
    }
    if let Some(memory_concept) = filter.memory_concept {
        if memory.memory_concept != memory_concept {
            return false;
        }
    }
    if let Some(ref language_code) = filter.language_code {
        if &memory.language_code != language_code {
            return false;
        }
    }
    if let Some(created_after) = filter.created_after {
        if memory.created_at < created_after {
            return false;
        }
    }
    if let Some(created_before) = filter.created_before {
        if memory.created_at > created_before {
            return false;
        }
    }
    if let Some(ref file) = filter.file {
        if !memory.files.iter().any(|f| f == file) {
            return false;
        }
    }
    if let Some(session_id) = filter.session_id {
        if memory.session_id != Some(session_id) {
            return false;
        }
    }
    if let Some(ref substring) = filter.text_contains {
        if !memory.text.contains(substring.as_str()) {
            return false;
        }
    }
    true
}

/// Process-local, DashMap-backed RecordStore used for tests and as the
/// embedded default when no external database is configured.
#[derive(Default)]
pub struct InMemoryRecordStore {
    // BTreeMap keyed by (created_at, id) gives a stable iteration order for
    // cursor pagination without a secondary index.
    rows: RwLock<BTreeMap<(chrono::DateTime<chrono::Utc>, MemoryId), Memory>>,
    by_id: DashMap<MemoryId, (chrono::DateTime<chrono::Utc>, MemoryId)>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn put(&self, memory: Memory) -> Result<()> {
        let key = (memory.created_at, memory.id);
        self.by_id.insert(memory.id, key);
        self.rows.write().insert(key, memory);
        Ok(())
    }

    async fn get(&self, id: MemoryId) -> Result<Option<Memory>> {
        let Some(key) = self.by_id.get(&id).map(|k| *k) else {
            return Ok(None);
        };
        Ok(self.rows.read().get(&key).cloned())
    }

    async fn update(&self, id: MemoryId, patch: RecordPatch) -> Result<Memory> {
        let Some(key) = self.by_id.get(&id).map(|k| *k) else {
            return Err(MemoriaError::NotFound(format!("memory {}", id)));
        };
        let mut rows = self.rows.write();
        let memory = rows
            .get_mut(&key)
            .ok_or_else(|| MemoriaError::NotFound(format!("memory {}", id)))?;
        patch(memory)?;
        Ok(memory.clone())
    }

    async fn delete(&self, id: MemoryId) -> Result<()> {
        if let Some((_, key)) = self.by_id.remove(&id) {
            self.rows.write().remove(&key);
        }
        Ok(())
    }

    async fn query(
        &self,
        filter: &MemoryFilter,
        order: SortOrder,
        limit: usize,
        cursor: Option<&Cursor>,
    ) -> Result<Page<Memory>> {
        let rows = self.rows.read();
        let mut matched: Vec<Memory> = rows
            .values()
            .filter(|m| matches_filter(m, filter))
            .cloned()
            .collect();

        match order {
            SortOrder::CreatedAtDesc => {
                matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)))
            }
            SortOrder::RelevanceDesc => {
                matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)))
            }
        }

        if let Some(cursor) = cursor {
            matched.retain(|m| (m.created_at, m.id) < (cursor.created_at, cursor.id));
        }

        let has_more = matched.len() > limit;
        matched.truncate(limit);

        let next_cursor = if has_more {
            matched.last().map(|m| {
                Cursor {
                    created_at: m.created_at,
                    id: m.id,
                }
                .encode()
            })
        } else {
            None
        };

        Ok(Page {
            items: matched,
            next_cursor,
        })
    }

    async fn bulk_get(&self, ids: &[MemoryId]) -> Result<Vec<Memory>> {
        let rows = self.rows.read();
        Ok(ids
            .iter()
            .filter_map(|id| self.by_id.get(id).and_then(|key| rows.get(&key).cloned()))
            .collect())
    }

    async fn count(&self, filter: &MemoryFilter) -> Result<i64> {
        let rows = self.rows.read();
        Ok(rows.values().filter(|m| matches_filter(m, filter)).count() as i64)
    }
}
