//! SQLite-backed RecordStore (spec §4.1, §6 "relational store for records")
//!
//! A single connection guarded by a `parking_lot::Mutex`, matching the
//! teacher's `storage::connection::Storage` shape. Blocking rusqlite calls
//! run on `spawn_blocking` so the async trait methods never stall the
//! reactor.

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use std::path::Path;
use std::sync::Arc;

use crate::error::{MemoriaError, Result};
use crate::types::{Cursor, Memory, MemoryFilter, MemoryId, Page, SortOrder};

use super::record::{RecordPatch, RecordStore};

const SCHEMA_VERSION: i64 = 1;

fn is_transient(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    )
}

fn map_sqlite_err(err: rusqlite::Error) -> MemoriaError {
    if is_transient(&err) {
        MemoriaError::TransientStorage(err.to_string())
    } else {
        MemoriaError::Database(err)
    }
}

pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags).map_err(map_sqlite_err)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(map_sqlite_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA busy_timeout=30000;
            PRAGMA foreign_keys=ON;
            "#,
        )
        .map_err(map_sqlite_err)?;
        run_migrations(&conn)?;
        Ok(SqliteRecordStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);
        CREATE TABLE IF NOT EXISTS memories (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            memory_type TEXT NOT NULL,
            memory_concept TEXT NOT NULL,
            language_code TEXT NOT NULL,
            created_at TEXT NOT NULL,
            session_id TEXT,
            archived_at TEXT,
            expires_at TEXT,
            text TEXT NOT NULL,
            data TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_memories_user_created
            ON memories(user_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_memories_session
            ON memories(session_id);
        "#,
    )
    .map_err(map_sqlite_err)?;

    let version: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| row.get(0))
        .map_err(map_sqlite_err)?;
    if version < SCHEMA_VERSION {
        conn.execute("INSERT INTO schema_version (version) VALUES (?1)", params![SCHEMA_VERSION])
            .map_err(map_sqlite_err)?;
    }
    Ok(())
}

fn row_to_memory(data: &str) -> Result<Memory> {
    serde_json::from_str(data).map_err(MemoriaError::Serialization)
}

fn insert_or_replace(conn: &Connection, memory: &Memory) -> Result<()> {
    let data = serde_json::to_string(memory)?;
    conn.execute(
        r#"INSERT OR REPLACE INTO memories
           (id, user_id, agent_id, memory_type, memory_concept, language_code,
            created_at, session_id, archived_at, expires_at, text, data)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"#,
        params![
            memory.id.to_string(),
            memory.user_id,
            memory.agent_id,
            memory.memory_type.as_str(),
            memory.memory_concept.as_str(),
            memory.language_code,
            memory.created_at.to_rfc3339(),
            memory.session_id.map(|s| s.to_string()),
            memory.archived_at.map(|t| t.to_rfc3339()),
            memory.expires_at.map(|t| t.to_rfc3339()),
            memory.text,
            data,
        ],
    )
    .map_err(map_sqlite_err)?;
    Ok(())
}

fn fetch_by_id(conn: &Connection, id: MemoryId) -> Result<Option<Memory>> {
    let mut stmt = conn
        .prepare("SELECT data FROM memories WHERE id = ?1")
        .map_err(map_sqlite_err)?;
    let mut rows = stmt.query(params![id.to_string()]).map_err(map_sqlite_err)?;
    match rows.next().map_err(map_sqlite_err)? {
        Some(row) => {
            let data: String = row.get(0).map_err(map_sqlite_err)?;
            Ok(Some(row_to_memory(&data)?))
        }
        None => Ok(None),
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn put(&self, memory: Memory) -> Result<()> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || insert_or_replace(&conn.lock(), &memory))
            .await
            .map_err(|e| MemoriaError::Internal(e.to_string()))?
    }

    async fn get(&self, id: MemoryId) -> Result<Option<Memory>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || fetch_by_id(&conn.lock(), id))
            .await
            .map_err(|e| MemoriaError::Internal(e.to_string()))?
    }

    async fn update(&self, id: MemoryId, patch: RecordPatch) -> Result<Memory> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            let mut memory = fetch_by_id(&guard, id)?
                .ok_or_else(|| MemoriaError::NotFound(format!("memory {}", id)))?;
            patch(&mut memory)?;
            insert_or_replace(&guard, &memory)?;
            Ok(memory)
        })
        .await
        .map_err(|e| MemoriaError::Internal(e.to_string()))?
    }

    async fn delete(&self, id: MemoryId) -> Result<()> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            conn.lock()
                .execute("DELETE FROM memories WHERE id = ?1", params![id.to_string()])
                .map_err(map_sqlite_err)?;
            Ok(())
        })
        .await
        .map_err(|e| MemoriaError::Internal(e.to_string()))?
    }

    async fn query(
        &self,
        filter: &MemoryFilter,
        order: SortOrder,
        limit: usize,
        cursor: Option<&Cursor>,
    ) -> Result<Page<Memory>> {
        // Filtering and ordering happen in Rust over the JSON column; at this
        // crate's scale a denormalized scan is simpler than hand-rolled SQL
        // per filter combination and still bounded by the user_id index.
        let conn = self.conn.clone();
        let filter = filter.clone();
        let cursor = cursor.cloned();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            let mut stmt = guard
                .prepare("SELECT data FROM memories WHERE user_id = ?1 OR ?1 IS NULL")
                .map_err(map_sqlite_err)?;
            let rows = stmt
                .query_map(params![filter.user_id], |row| row.get::<_, String>(0))
                .map_err(map_sqlite_err)?;

            let mut matched = Vec::new();
            for row in rows {
                let data = row.map_err(map_sqlite_err)?;
                let memory = row_to_memory(&data)?;
                if super::record::matches_filter(&memory, &filter) {
                    matched.push(memory);
                }
            }

            match order {
                SortOrder::CreatedAtDesc | SortOrder::RelevanceDesc => {
                    matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)))
                }
            }

            if let Some(cursor) = &cursor {
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
        })
        .await
        .map_err(|e| MemoriaError::Internal(e.to_string()))?
    }

    async fn bulk_get(&self, ids: &[MemoryId]) -> Result<Vec<Memory>> {
        let conn = self.conn.clone();
        let ids: Vec<MemoryId> = ids.to_vec();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            let mut out = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(memory) = fetch_by_id(&guard, id)? {
                    out.push(memory);
                }
            }
            Ok(out)
        })
        .await
        .map_err(|e| MemoriaError::Internal(e.to_string()))?
    }

    async fn count(&self, filter: &MemoryFilter) -> Result<i64> {
        let page = self
            .query(filter, SortOrder::CreatedAtDesc, usize::MAX, None)
            .await?;
        Ok(page.items.len() as i64)
    }

    async fn health_check(&self) -> Result<()> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            conn.lock()
                .query_row("SELECT 1", [], |_| Ok(()))
                .map_err(map_sqlite_err)
        })
        .await
        .map_err(|e| MemoriaError::Internal(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MemoryConcept, MemoryType, SharePolicy};
    use uuid::Uuid;

    fn sample_memory(user_id: &str, text: &str) -> Memory {
        let now = chrono::Utc::now();
        Memory {
            id: Uuid::new_v4(),
            agent_id: "a1".into(),
            user_id: user_id.into(),
            text: text.into(),
            summary: Memory::derive_summary(text),
            char_count: text.chars().count(),
            token_estimate: Memory::token_estimate_for(text.chars().count()),
            memory_type: MemoryType::General,
            memory_concept: MemoryConcept::General,
            narrative: None,
            before_state: None,
            after_state: None,
            files: vec![],
            facts: vec![],
            language_code: "en".into(),
            language_confidence: 1.0,
            created_at: now,
            updated_at: now,
            expires_at: None,
            archived_at: None,
            summarized: false,
            session_id: None,
            share_policy: SharePolicy::Private,
            has_vector: false,
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let memory = sample_memory("u1", "hello sqlite");
        let id = memory.id;
        store.put(memory).await.unwrap();
        let fetched = store.get(id).await.unwrap().unwrap();
        assert_eq!(fetched.text, "hello sqlite");
    }

    #[tokio::test]
    async fn query_filters_by_user() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        store.put(sample_memory("u1", "one")).await.unwrap();
        store.put(sample_memory("u2", "two")).await.unwrap();
        let filter = MemoryFilter {
            user_id: Some("u1".into()),
            ..Default::default()
        };
        let page = store
            .query(&filter, SortOrder::CreatedAtDesc, 10, None)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].text, "one");
    }
}
