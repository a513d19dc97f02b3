//! Write path: `AddMemory`, `UpdateMemory`, `DeleteMemory`, `Undo` (spec §4.3, §4.9)

use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{MemoriaError, Result};
use crate::types::{
    reserved_metadata_keys, AuditEntry, AuditStatus, CreateMemoryInput, Event, EventType, Memory,
    MemoryId, SharePolicy, UndoEntry, UndoStatus, UpdateMemoryInput,
};

use super::{classify, CancellationToken, MemoryEngine};

/// Input text over this many bytes is rejected with `TooLarge` rather than
/// silently truncated (spec §4.3, §8 boundary behavior).
pub const MAX_TEXT_BYTES: usize = 1_048_576;

fn fingerprint(user_id: &str, agent_id: &str, normalized_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(b"|");
    hasher.update(agent_id.as_bytes());
    hasher.update(b"|");
    hasher.update(normalized_text.as_bytes());
    hex::encode(hasher.finalize())
}

fn normalize_text(text: &str) -> String {
    text.trim_end().to_string()
}

impl MemoryEngine {
    /// `AddMemory` (spec §4.3 steps 1-10).
    pub async fn add_memory(&self, input: CreateMemoryInput, cancel: CancellationToken) -> Result<Memory> {
        if input.text.is_empty() {
            return Err(MemoriaError::InvalidInput("text must not be empty".into()));
        }
        if input.text.len() > MAX_TEXT_BYTES {
            return Err(MemoriaError::TooLarge(format!(
                "text is {} bytes, exceeds cap of {}",
                input.text.len(),
                MAX_TEXT_BYTES
            )));
        }

        // Steps 1-2: normalize, derive summary/char_count/token_estimate.
        let normalized_text = normalize_text(&input.text);
        let char_count = normalized_text.chars().count();
        let token_estimate = Memory::token_estimate_for(char_count);
        let summary = Memory::derive_summary(&normalized_text);

        // Step 3: auto-categorization.
        let memory_type = input.memory_type.unwrap_or_else(|| classify::classify_type(&normalized_text));
        let memory_concept = input
            .memory_concept
            .unwrap_or_else(|| classify::classify_concept(&normalized_text));
        let files = input.files.unwrap_or_else(|| classify::extract_files(&normalized_text));
        let facts = input.facts.unwrap_or_else(|| classify::extract_facts(&normalized_text));

        // Step 4: language detection.
        let (language_code, language_confidence) = match input.language_code {
            Some(code) => (code, 1.0),
            None => {
                let detection = self.language_detector.detect(&normalized_text);
                (detection.language_code.to_string(), detection.confidence)
            }
        };

        cancel.check()?;

        let share_policy = input.share_policy.unwrap_or(SharePolicy::Private);
        let now = Utc::now();
        let expires_at = input.ttl_seconds.map(|secs| now + chrono::Duration::seconds(secs));

        let mut metadata = input.metadata;

        // Steps 5-6 happen under the fingerprint lock so concurrent adds of
        // the same (user_id, agent_id, text) collapse onto one memory.
        let lock_key = fingerprint(&input.user_id, &input.agent_id, &normalized_text);
        let lock = self.fingerprint_lock(&lock_key);
        let _guard = lock.lock().await;
        cancel.check()?;

        if !input.skip_dedup {
            if let Some(existing) = self.find_exact_duplicate(&input.user_id, &normalized_text, &cancel).await? {
                return self.merge_into_existing(existing, &files, &facts).await;
            }
        }

        let sibling_id = if !input.skip_dedup {
            self.find_sibling_candidate(&input.user_id, &normalized_text, &cancel).await?
        } else {
            None
        };

        let id = Uuid::new_v4();
        let memory = Memory {
            id,
            agent_id: input.agent_id.clone(),
            user_id: input.user_id.clone(),
            text: normalized_text.clone(),
            summary,
            char_count,
            token_estimate,
            memory_type,
            memory_concept,
            narrative: input.narrative,
            before_state: input.before_state,
            after_state: input.after_state,
            files,
            facts,
            language_code,
            language_confidence,
            created_at: now,
            updated_at: now,
            expires_at,
            archived_at: None,
            summarized: false,
            session_id: input.session_id,
            share_policy,
            has_vector: false,
            metadata: std::mem::take(&mut metadata),
        };

        // Step 6: commit point. Steps 1-5 are side-effect-free; a cancel
        // before this line leaves no adapter state for this id.
        cancel.check()?;
        self.record_store.put(memory.clone()).await?;

        let mut memory = memory;
        let mut repair_pending = false;

        // Steps 7-9: vector upsert, graph merge, journal. Failure here
        // leaves the RecordStore write intact but marks repair_pending so
        // the read path hides the memory until a repair task fixes it up.
        if let Err(err) = self.embed_and_upsert(&mut memory).await {
            tracing::warn!(memory_id = %id, error = %err, "vector upsert failed, scheduling repair");
            repair_pending = true;
        }

        if let Err(err) = self.merge_graph_edges(&memory, sibling_id).await {
            tracing::warn!(memory_id = %id, error = %err, "graph merge failed, scheduling repair");
            repair_pending = true;
        }

        if repair_pending {
            memory
                .metadata
                .insert(reserved_metadata_keys::REPAIR_PENDING.to_string(), serde_json::json!(true));
            self.record_store
                .update(
                    id,
                    Box::new(|m: &mut Memory| {
                        m.metadata
                            .insert(reserved_metadata_keys::REPAIR_PENDING.to_string(), serde_json::json!(true));
                        Ok(())
                    }),
                )
                .await?;
        }

        self.write_add_journal(&memory, repair_pending).await?;

        let event = Event {
            event_type: EventType::MemoryAdded,
            memory_id: Some(id),
            session_id: memory.session_id,
            agent_id: memory.agent_id.clone(),
            user_id: memory.user_id.clone(),
            timestamp: Utc::now(),
            data: serde_json::json!({ "summary": memory.summary }),
        };
        self.publish(event).await?;

        Ok(memory)
    }

    /// `AddObservation` (spec §6): `AddMemory` preset with `memory_type`/
    /// `memory_concept` already decided, so callers that already know the
    /// category skip auto-classification for it.
    pub async fn add_observation(
        &self,
        text: String,
        memory_type: crate::types::MemoryType,
        memory_concept: crate::types::MemoryConcept,
        agent_id: String,
        user_id: String,
        cancel: CancellationToken,
    ) -> Result<Memory> {
        self.add_memory(
            CreateMemoryInput {
                text,
                memory_type: Some(memory_type),
                memory_concept: Some(memory_concept),
                agent_id,
                user_id,
                ..Default::default()
            },
            cancel,
        )
        .await
    }

    /// `SetMemoryTTL(id, ttl_seconds)` (spec §6): `UpdateMemory` preset that
    /// only ever touches `expires_at`. `ttl_seconds = None` clears it.
    pub async fn set_memory_ttl(&self, id: MemoryId, ttl_seconds: Option<i64>) -> Result<Memory> {
        self.update_memory(
            id,
            UpdateMemoryInput {
                ttl_seconds: Some(ttl_seconds),
                ..Default::default()
            },
        )
        .await
    }

    /// `CheckDuplicate(user_id, text)` (spec §6): a read-only probe over the
    /// same top-K same-user vector search `AddMemory` uses for its own
    /// dedup decision, exposed so callers can ask before writing.
    pub async fn check_duplicate(&self, user_id: &str, text: &str) -> Result<Option<(MemoryId, f32)>> {
        let normalized_text = normalize_text(text);
        self.top_dedup_candidate(user_id, &normalized_text, &CancellationToken::new()).await
    }

    async fn find_exact_duplicate(
        &self,
        user_id: &str,
        normalized_text: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Memory>> {
        let Some((candidate_id, score)) = self.top_dedup_candidate(user_id, normalized_text, cancel).await? else {
            return Ok(None);
        };
        if score < self.config.dedup.threshold {
            return Ok(None);
        }
        let candidate = self
            .record_store
            .get(candidate_id)
            .await?
            .ok_or_else(|| MemoriaError::Internal("dedup candidate vanished from record store".into()))?;
        if normalize_text(&candidate.text) == normalized_text {
            Ok(Some(candidate))
        } else {
            Ok(None)
        }
    }

    async fn find_sibling_candidate(
        &self,
        user_id: &str,
        normalized_text: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<MemoryId>> {
        let Some((candidate_id, score)) = self.top_dedup_candidate(user_id, normalized_text, cancel).await? else {
            return Ok(None);
        };
        if score >= self.config.dedup.threshold {
            Ok(Some(candidate_id))
        } else {
            Ok(None)
        }
    }

    /// Embeds `normalized_text` and returns the best same-`user_id` vector
    /// match, if any, above K=5 candidates (spec §4.3 step 5).
    async fn top_dedup_candidate(
        &self,
        user_id: &str,
        normalized_text: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<(MemoryId, f32)>> {
        const CANDIDATE_POOL: usize = 20;
        const TOP_K: usize = 5;

        cancel.check()?;
        let embedding = self.embedder.embed(normalized_text).await?;
        let candidates = self.vector_store.search(&embedding, CANDIDATE_POOL).await?;

        let mut same_user = Vec::new();
        for (candidate_id, score) in candidates {
            if let Some(candidate) = self.record_store.get(candidate_id).await? {
                if candidate.user_id == user_id {
                    same_user.push((candidate_id, score));
                }
            }
            if same_user.len() >= TOP_K {
                break;
            }
        }

        Ok(same_user.into_iter().max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal)))
    }

    async fn merge_into_existing(&self, existing: Memory, files: &[String], facts: &[String]) -> Result<Memory> {
        let id = existing.id;
        let merged = self
            .record_store
            .update(
                id,
                Box::new({
                    let files = files.to_vec();
                    let facts = facts.to_vec();
                    move |m: &mut Memory| {
                        let mention_count = m
                            .metadata
                            .get(reserved_metadata_keys::MENTION_COUNT)
                            .and_then(|v| v.as_i64())
                            .unwrap_or(1);
                        m.metadata.insert(
                            reserved_metadata_keys::MENTION_COUNT.to_string(),
                            serde_json::json!(mention_count + 1),
                        );
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
                        m.updated_at = Utc::now();
                        Ok(())
                    }
                }),
            )
            .await?;

        self.write_add_journal(&merged, false).await?;
        Ok(merged)
    }

    async fn embed_and_upsert(&self, memory: &mut Memory) -> Result<()> {
        let embedding = self.embedder.embed(&memory.text).await?;
        self.vector_store
            .upsert(memory.id, embedding, serde_json::json!({ "user_id": memory.user_id }))
            .await?;
        memory.has_vector = true;
        self.record_store
            .update(
                memory.id,
                Box::new(|m: &mut Memory| {
                    m.has_vector = true;
                    Ok(())
                }),
            )
            .await?;
        Ok(())
    }

    async fn merge_graph_edges(&self, memory: &Memory, sibling_id: Option<MemoryId>) -> Result<()> {
        let memory_node = memory.id.to_string();
        self.graph_store
            .merge_node(&memory_node, vec!["memory".to_string()], serde_json::json!({}))
            .await?;

        if let Some(session_id) = memory.session_id {
            let session_node = session_id.to_string();
            self.graph_store
                .merge_node(&session_node, vec!["session".to_string()], serde_json::json!({}))
                .await?;
            self.graph_store
                .merge_edge(&session_node, &memory_node, "contains", serde_json::json!({}))
                .await?;
        }

        for file in &memory.files {
            self.graph_store
                .merge_node(file, vec!["file".to_string()], serde_json::json!({}))
                .await?;
            self.graph_store
                .merge_edge(file, &memory_node, "references", serde_json::json!({}))
                .await?;
        }

        if let Some(sibling_id) = sibling_id {
            self.graph_store
                .merge_edge(&memory_node, &sibling_id.to_string(), "sibling_of", serde_json::json!({}))
                .await?;
        }

        Ok(())
    }

    async fn write_add_journal(&self, memory: &Memory, repair_pending: bool) -> Result<Uuid> {
        let status = if repair_pending { AuditStatus::Partial } else { AuditStatus::Success };
        let undo_id = Uuid::new_v4();
        self.audit_log
            .append(AuditEntry {
                log_id: Uuid::new_v4(),
                timestamp: Utc::now(),
                operation_type: "add_memory".to_string(),
                agent_id: memory.agent_id.clone(),
                status,
                memory_id: Some(memory.id),
                undo_id: Some(undo_id),
                detail: Default::default(),
                execution_time_ms: 0.0,
                error_message: None,
            })
            .await?;

        self.undo_log
            .append(UndoEntry {
                undo_id,
                operation_type: "add_memory".to_string(),
                agent_id: memory.agent_id.clone(),
                original_state: serde_json::Value::Null,
                new_state: serde_json::to_value(memory)?,
                memory_id: Some(memory.id),
                operation_chain_id: None,
                status: UndoStatus::Pending,
                created_at: Utc::now(),
                expires_at: Utc::now() + chrono::Duration::days(self.config.undo.retention_days as i64),
            })
            .await?;

        Ok(undo_id)
    }

    async fn publish(&self, event: Event) -> Result<()> {
        // Published to both the swappable EventBus adapter (§4.1, durable
        // replay / external consumers) and the subscriber-facing
        // RealtimeCoordinator (§4.7, backpressure-aware fan-out).
        self.event_bus.publish(&event.topic(), event.clone()).await?;
        self.realtime.publish(event).await
    }

    /// `UpdateMemory`: `None` fields in `patch` leave the corresponding
    /// attribute unchanged.
    pub async fn update_memory(&self, id: MemoryId, patch: UpdateMemoryInput) -> Result<Memory> {
        let before = self
            .record_store
            .get(id)
            .await?
            .ok_or_else(|| MemoriaError::NotFound(format!("memory {}", id)))?;
        let before_state = serde_json::to_value(&before)?;

        let updated = self
            .record_store
            .update(
                id,
                Box::new(move |m: &mut Memory| {
                    if let Some(text) = patch.text {
                        m.char_count = text.chars().count();
                        m.token_estimate = Memory::token_estimate_for(m.char_count);
                        m.summary = Memory::derive_summary(&text);
                        m.text = text;
                    }
                    if let Some(memory_type) = patch.memory_type {
                        m.memory_type = memory_type;
                    }
                    if let Some(memory_concept) = patch.memory_concept {
                        m.memory_concept = memory_concept;
                    }
                    if let Some(narrative) = patch.narrative {
                        m.narrative = Some(narrative);
                    }
                    if let Some(before_state) = patch.before_state {
                        m.before_state = Some(before_state);
                    }
                    if let Some(after_state) = patch.after_state {
                        m.after_state = Some(after_state);
                    }
                    if let Some(files) = patch.files {
                        m.files = files;
                    }
                    if let Some(facts) = patch.facts {
                        m.facts = facts;
                    }
                    if let Some(share_policy) = patch.share_policy {
                        m.share_policy = share_policy;
                    }
                    if let Some(metadata) = patch.metadata {
                        m.metadata = metadata;
                    }
                    if let Some(ttl_seconds) = patch.ttl_seconds {
                        m.expires_at = ttl_seconds.map(|secs| Utc::now() + chrono::Duration::seconds(secs));
                    }
                    m.updated_at = Utc::now();
                    Ok(())
                }),
            )
            .await?;

        let undo_id = Uuid::new_v4();
        self.audit_log
            .append(AuditEntry {
                log_id: Uuid::new_v4(),
                timestamp: Utc::now(),
                operation_type: "update_memory".to_string(),
                agent_id: updated.agent_id.clone(),
                status: AuditStatus::Success,
                memory_id: Some(id),
                undo_id: Some(undo_id),
                detail: Default::default(),
                execution_time_ms: 0.0,
                error_message: None,
            })
            .await?;

        self.undo_log
            .append(UndoEntry {
                undo_id,
                operation_type: "update_memory".to_string(),
                agent_id: updated.agent_id.clone(),
                original_state: before_state,
                new_state: serde_json::to_value(&updated)?,
                memory_id: Some(id),
                operation_chain_id: None,
                status: UndoStatus::Pending,
                created_at: Utc::now(),
                expires_at: Utc::now() + chrono::Duration::days(self.config.undo.retention_days as i64),
            })
            .await?;

        let event = Event {
            event_type: EventType::MemoryUpdated,
            memory_id: Some(id),
            session_id: updated.session_id,
            agent_id: updated.agent_id.clone(),
            user_id: updated.user_id.clone(),
            timestamp: Utc::now(),
            data: serde_json::json!({}),
        };
        self.publish(event).await?;

        Ok(updated)
    }

    /// `DeleteMemory`: removes from every adapter and publishes a
    /// never-dropped `memory_deleted` event (spec §4.7).
    pub async fn delete_memory(&self, id: MemoryId) -> Result<()> {
        let existing = self
            .record_store
            .get(id)
            .await?
            .ok_or_else(|| MemoriaError::NotFound(format!("memory {}", id)))?;
        let before_state = serde_json::to_value(&existing)?;

        self.record_store.delete(id).await?;
        self.vector_store.delete(id).await?;
        self.graph_store.delete_node(&id.to_string(), true).await?;

        let undo_id = Uuid::new_v4();
        self.audit_log
            .append(AuditEntry {
                log_id: Uuid::new_v4(),
                timestamp: Utc::now(),
                operation_type: "delete_memory".to_string(),
                agent_id: existing.agent_id.clone(),
                status: AuditStatus::Success,
                memory_id: Some(id),
                undo_id: Some(undo_id),
                detail: Default::default(),
                execution_time_ms: 0.0,
                error_message: None,
            })
            .await?;

        self.undo_log
            .append(UndoEntry {
                undo_id,
                operation_type: "delete_memory".to_string(),
                agent_id: existing.agent_id.clone(),
                original_state: before_state,
                new_state: serde_json::Value::Null,
                memory_id: Some(id),
                operation_chain_id: None,
                status: UndoStatus::Pending,
                created_at: Utc::now(),
                expires_at: Utc::now() + chrono::Duration::days(self.config.undo.retention_days as i64),
            })
            .await?;

        let event = Event {
            event_type: EventType::MemoryDeleted,
            memory_id: Some(id),
            session_id: existing.session_id,
            agent_id: existing.agent_id.clone(),
            user_id: existing.user_id.clone(),
            timestamp: Utc::now(),
            data: serde_json::json!({}),
        };
        self.publish(event).await?;

        Ok(())
    }

    /// `Undo(undo_id)` (spec §4.9): restores `original_state` to the
    /// RecordStore and emits a compensating `memory_restored` update event.
    pub async fn undo(&self, undo_id: crate::types::UndoId) -> Result<()> {
        let entry = self.undo_log.get(undo_id).await?;
        crate::journal::undo::check_not_expired(&entry)?;

        // Composite undo (spec §4.9): every entry sharing this chain reverses
        // together, all-or-nothing, or none of them do.
        let chain = match entry.operation_chain_id {
            Some(chain_id) => self.undo_log.get_chain(chain_id).await?,
            None => vec![entry.clone()],
        };
        for member in &chain {
            if member.undo_id != undo_id {
                crate::journal::undo::check_not_expired(member)?;
            }
        }

        for member in &chain {
            self.undo_entry_state(member).await?;
        }
        for member in &chain {
            self.undo_log.set_status(member.undo_id, UndoStatus::Completed).await?;
        }

        if let Some(memory_id) = entry.memory_id {
            let event = Event {
                event_type: EventType::MemoryUpdated,
                memory_id: Some(memory_id),
                session_id: None,
                agent_id: entry.agent_id.clone(),
                user_id: String::new(),
                timestamp: Utc::now(),
                data: serde_json::json!({ "restored": true }),
            };
            self.publish(event).await?;
        }

        Ok(())
    }

    /// Replays a single undo entry's state reversal without touching its
    /// status; [`Self::undo`] calls this once per chain member so a
    /// composite undo applies (or rejects) as one unit.
    async fn undo_entry_state(&self, entry: &UndoEntry) -> Result<()> {
        match (&entry.original_state, &entry.new_state) {
            (serde_json::Value::Null, _) => {
                // Undoing an add: delete the memory it created.
                if let Some(memory_id) = entry.memory_id {
                    self.record_store.delete(memory_id).await?;
                    self.vector_store.delete(memory_id).await?;
                    self.graph_store.delete_node(&memory_id.to_string(), true).await?;
                }
            }
            (original, serde_json::Value::Null) => {
                // Undoing a delete: restore the prior record.
                let memory: Memory = serde_json::from_value(original.clone())?;
                self.record_store.put(memory.clone()).await?;
                if memory.has_vector {
                    if let Ok(embedding) = self.embedder.embed(&memory.text).await {
                        let _ = self
                            .vector_store
                            .upsert(memory.id, embedding, serde_json::json!({ "user_id": memory.user_id }))
                            .await;
                    }
                }
            }
            (original, _) => {
                // Undoing an update/merge: restore the prior field values,
                // including the embedding they were indexed under.
                let memory: Memory = serde_json::from_value(original.clone())?;
                self.record_store.put(memory.clone()).await?;
                if memory.has_vector {
                    if let Ok(embedding) = self.embedder.embed(&memory.text).await {
                        let _ = self
                            .vector_store
                            .upsert(memory.id, embedding, serde_json::json!({ "user_id": memory.user_id }))
                            .await;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn engine() -> MemoryEngine {
        MemoryEngine::builder(Config::default()).build()
    }

    fn input(text: &str, user_id: &str, agent_id: &str) -> CreateMemoryInput {
        CreateMemoryInput {
            text: text.to_string(),
            agent_id: agent_id.to_string(),
            user_id: user_id.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn add_then_get_preserves_text() {
        let engine = engine();
        let memory = engine
            .add_memory(input("Use JWT for auth.", "u1", "a1"), CancellationToken::new())
            .await
            .unwrap();
        let fetched = engine.record_store.get(memory.id).await.unwrap().unwrap();
        assert_eq!(fetched.text, "Use JWT for auth.");
    }

    #[tokio::test]
    async fn empty_text_is_rejected() {
        let engine = engine();
        let result = engine.add_memory(input("", "u1", "a1"), CancellationToken::new()).await;
        assert!(matches!(result, Err(MemoriaError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn text_over_byte_cap_is_rejected_without_truncation() {
        let engine = engine();
        let text = "a".repeat(MAX_TEXT_BYTES + 1);
        let result = engine.add_memory(input(&text, "u1", "a1"), CancellationToken::new()).await;
        assert!(matches!(result, Err(MemoriaError::TooLarge(_))));
    }

    #[tokio::test]
    async fn repeated_identical_add_merges_into_one_memory_with_mention_count() {
        let engine = engine();
        let first = engine
            .add_memory(input("Use JWT for auth.", "u1", "a1"), CancellationToken::new())
            .await
            .unwrap();
        let second = engine
            .add_memory(input("Use JWT for auth.", "u1", "a1"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        let stored = engine.record_store.get(first.id).await.unwrap().unwrap();
        let mention_count = stored
            .metadata
            .get(reserved_metadata_keys::MENTION_COUNT)
            .and_then(|v| v.as_i64())
            .unwrap();
        assert_eq!(mention_count, 2);
    }

    #[tokio::test]
    async fn delete_then_get_returns_none() {
        let engine = engine();
        let memory = engine
            .add_memory(input("temporary note", "u1", "a1"), CancellationToken::new())
            .await
            .unwrap();
        engine.delete_memory(memory.id).await.unwrap();
        assert!(engine.record_store.get(memory.id).await.unwrap().is_none());
    }

    async fn undo_id_for(engine: &MemoryEngine, memory_id: MemoryId, operation_type: &str) -> crate::types::UndoId {
        let entries = engine
            .audit_log
            .query(&crate::journal::AuditFilter {
                memory_id: Some(memory_id),
                operation_type: Some(operation_type.to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        entries
            .last()
            .and_then(|e| e.undo_id)
            .expect("audit entry carries an undo_id")
    }

    #[tokio::test]
    async fn undo_of_add_removes_the_memory() {
        let engine = engine();
        let memory = engine
            .add_memory(input("to be undone", "u1", "a1"), CancellationToken::new())
            .await
            .unwrap();

        let undo_id = undo_id_for(&engine, memory.id, "add_memory").await;
        engine.undo(undo_id).await.unwrap();

        assert!(engine.record_store.get(memory.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_then_undo_restores_original_text() {
        let engine = engine();
        let memory = engine
            .add_memory(input("original text", "u1", "a1"), CancellationToken::new())
            .await
            .unwrap();

        engine
            .update_memory(
                memory.id,
                UpdateMemoryInput {
                    text: Some("changed text".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let updated = engine.record_store.get(memory.id).await.unwrap().unwrap();
        assert_eq!(updated.text, "changed text");

        let undo_id = undo_id_for(&engine, memory.id, "update_memory").await;
        engine.undo(undo_id).await.unwrap();

        let restored = engine.record_store.get(memory.id).await.unwrap().unwrap();
        assert_eq!(restored.text, "original text");
    }

    #[tokio::test]
    async fn undo_of_delete_restores_the_memory() {
        let engine = engine();
        let memory = engine
            .add_memory(input("to be deleted then restored", "u1", "a1"), CancellationToken::new())
            .await
            .unwrap();

        engine.delete_memory(memory.id).await.unwrap();
        assert!(engine.record_store.get(memory.id).await.unwrap().is_none());

        let undo_id = undo_id_for(&engine, memory.id, "delete_memory").await;
        engine.undo(undo_id).await.unwrap();

        let restored = engine.record_store.get(memory.id).await.unwrap().unwrap();
        assert_eq!(restored.text, "to be deleted then restored");
    }

    #[tokio::test]
    async fn undo_of_already_undone_entry_conflicts() {
        let engine = engine();
        let memory = engine
            .add_memory(input("to be undone twice", "u1", "a1"), CancellationToken::new())
            .await
            .unwrap();

        let undo_id = undo_id_for(&engine, memory.id, "add_memory").await;
        engine.undo(undo_id).await.unwrap();
        assert!(engine.undo(undo_id).await.is_err());
    }

    #[tokio::test]
    async fn add_observation_sets_type_and_concept_without_auto_classification() {
        let engine = engine();
        let memory = engine
            .add_observation(
                "some ambiguous note that classify would guess differently on".to_string(),
                crate::types::MemoryType::Decision,
                crate::types::MemoryConcept::TradeOff,
                "a1".to_string(),
                "u1".to_string(),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(memory.memory_type, crate::types::MemoryType::Decision);
        assert_eq!(memory.memory_concept, crate::types::MemoryConcept::TradeOff);
    }

    #[tokio::test]
    async fn set_memory_ttl_updates_expiry_without_touching_text() {
        let engine = engine();
        let memory = engine
            .add_memory(input("ttl target", "u1", "a1"), CancellationToken::new())
            .await
            .unwrap();
        assert!(memory.expires_at.is_none());

        let updated = engine.set_memory_ttl(memory.id, Some(60)).await.unwrap();
        assert_eq!(updated.text, "ttl target");
        assert!(updated.expires_at.is_some());

        let cleared = engine.set_memory_ttl(memory.id, None).await.unwrap();
        assert!(cleared.expires_at.is_none());
    }

    #[tokio::test]
    async fn check_duplicate_finds_the_near_identical_memory_without_writing() {
        let engine = engine();
        engine
            .add_memory(input("Use JWT for auth.", "u1", "a1"), CancellationToken::new())
            .await
            .unwrap();

        let result = engine.check_duplicate("u1", "Use JWT for auth.").await.unwrap();
        assert!(result.is_some());

        let filter = crate::types::MemoryFilter {
            user_id: Some("u1".to_string()),
            ..Default::default()
        };
        let page = engine
            .record_store
            .query(&filter, crate::types::SortOrder::CreatedAtDesc, 10, None)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1, "check_duplicate must not write a new memory");
    }
}
