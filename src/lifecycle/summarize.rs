//! Scheduled summarization (spec §4.5)
//!
//! Selection: `created_at < now - min_age_days`, `char_count >= min_length`,
//! `summarized = false`. LLM summary on success; extractive fallback
//! (first N sentences fitting `target_length`) on LLM failure. Original
//! text is always preserved in `metadata.original_text`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::MemoryEngine;
use crate::error::Result;
use crate::types::{
    reserved_metadata_keys, AuditEntry, AuditStatus, Memory, MemoryConcept, MemoryFilter, MemoryId,
    SortOrder, UndoEntry, UndoStatus,
};

const SUMMARY_PROMPT: &str = "Summarize the following memory in two or three sentences, \
preserving concrete facts, file paths, and decisions.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizeCandidate {
    pub memory_id: MemoryId,
    pub original_char_count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummarizeReport {
    pub candidates: Vec<SummarizeCandidate>,
}

fn eligible(memory: &Memory, min_age_days: u32, min_length: usize) -> bool {
    let age_days = (chrono::Utc::now() - memory.created_at).num_days();
    !memory.summarized && memory.char_count >= min_length && age_days >= min_age_days as i64
}

/// Finds memories eligible for summarization without mutating anything.
pub async fn dry_run(engine: &MemoryEngine, user_id: &str) -> Result<SummarizeReport> {
    let filter = MemoryFilter {
        user_id: Some(user_id.to_string()),
        ..Default::default()
    };
    let page = engine
        .record_store
        .query(&filter, SortOrder::CreatedAtDesc, usize::MAX, None)
        .await?;

    let candidates = page
        .items
        .into_iter()
        .filter(|m| eligible(m, engine.config.summarize.min_age_days, engine.config.summarize.min_length))
        .map(|m| SummarizeCandidate {
            memory_id: m.id,
            original_char_count: m.char_count,
        })
        .collect();

    Ok(SummarizeReport { candidates })
}

/// `SummarizeCategory(user_id, concept)` (spec §6): every not-yet-summarized
/// memory under `concept`, regardless of `min_age_days`/`min_length` — an
/// explicit per-category request bypasses the scheduled sweep's eligibility
/// window.
pub async fn dry_run_by_concept(engine: &MemoryEngine, user_id: &str, concept: MemoryConcept) -> Result<SummarizeReport> {
    let filter = MemoryFilter {
        user_id: Some(user_id.to_string()),
        memory_concept: Some(concept),
        ..Default::default()
    };
    let page = engine
        .record_store
        .query(&filter, SortOrder::CreatedAtDesc, usize::MAX, None)
        .await?;

    let candidates = page
        .items
        .into_iter()
        .filter(|m| !m.summarized)
        .map(|m| SummarizeCandidate {
            memory_id: m.id,
            original_char_count: m.char_count,
        })
        .collect();

    Ok(SummarizeReport { candidates })
}

/// Extractive fallback: first sentences that fit within `target_length` chars.
fn extractive_summary(text: &str, target_length: usize) -> String {
    let mut out = String::new();
    for sentence in text.split_inclusive(['.', '\n']) {
        if out.chars().count() + sentence.chars().count() > target_length && !out.is_empty() {
            break;
        }
        out.push_str(sentence);
    }
    if out.is_empty() {
        out = text.chars().take(target_length).collect();
    }
    out.trim().to_string()
}

pub async fn apply(engine: &MemoryEngine, report: &SummarizeReport) -> Result<()> {
    for candidate in &report.candidates {
        apply_one(engine, candidate.memory_id).await?;
    }
    Ok(())
}

async fn apply_one(engine: &MemoryEngine, memory_id: MemoryId) -> Result<()> {
    let Some(memory) = engine.record_store.get(memory_id).await? else {
        return Ok(());
    };
    let before_state = serde_json::to_value(&memory)?;
    let original_text = memory.text.clone();
    let target_length = engine.config.summarize.target_length;

    let summary_text = match &engine.completer {
        Some(completer) => match completer.complete(SUMMARY_PROMPT, &original_text, target_length).await {
            Ok((text, _cost)) => text,
            Err(err) => {
                tracing::warn!(memory_id = %memory_id, error = %err, "summarization LLM call failed, using extractive fallback");
                extractive_summary(&original_text, target_length)
            }
        },
        None => extractive_summary(&original_text, target_length),
    };

    let new_char_count = summary_text.chars().count();
    let new_embedding = engine.embedder.embed(&summary_text).await?;

    let updated = engine
        .record_store
        .update(
            memory_id,
            Box::new({
                let summary_text = summary_text.clone();
                let original_text = original_text.clone();
                move |m: &mut Memory| {
                    m.metadata
                        .insert(reserved_metadata_keys::ORIGINAL_TEXT.to_string(), serde_json::json!(original_text));
                    m.text = summary_text.clone();
                    m.summary = summary_text;
                    m.char_count = new_char_count;
                    m.token_estimate = Memory::token_estimate_for(new_char_count);
                    m.summarized = true;
                    m.updated_at = chrono::Utc::now();
                    Ok(())
                }
            }),
        )
        .await?;

    // The pre-summary vector is not retained; the summary's embedding replaces it.
    engine
        .vector_store
        .upsert(memory_id, new_embedding, serde_json::json!({ "user_id": updated.user_id }))
        .await?;

    let now = chrono::Utc::now();
    let undo_id = Uuid::new_v4();
    engine
        .audit_log
        .append(AuditEntry {
            log_id: Uuid::new_v4(),
            timestamp: now,
            operation_type: "summarize_apply".to_string(),
            agent_id: updated.agent_id.clone(),
            status: AuditStatus::Success,
            memory_id: Some(memory_id),
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
            operation_type: "summarize_apply".to_string(),
            agent_id: updated.agent_id.clone(),
            original_state: before_state,
            new_state: serde_json::to_value(&updated)?,
            memory_id: Some(memory_id),
            operation_chain_id: None,
            status: UndoStatus::Pending,
            created_at: now,
            expires_at: now + chrono::Duration::days(engine.config.undo.retention_days as i64),
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

    #[tokio::test]
    async fn eligible_memory_is_summarized_and_preserves_original() {
        let mut config = Config::default();
        config.summarize.min_age_days = 30;
        config.summarize.min_length = 1000;
        config.summarize.target_length = 200;
        let engine = MemoryEngine::builder(config).build();

        let long_text = "This is a sentence about the auth system. ".repeat(40);
        let memory = engine
            .add_memory(
                CreateMemoryInput {
                    text: long_text.clone(),
                    agent_id: "a1".into(),
                    user_id: "u1".into(),
                    ..Default::default()
                },
                CancellationToken::new(),
            )
            .await
            .unwrap();

        engine
            .record_store
            .update(
                memory.id,
                Box::new(|m: &mut Memory| {
                    m.created_at = chrono::Utc::now() - chrono::Duration::days(45);
                    Ok(())
                }),
            )
            .await
            .unwrap();

        let report = dry_run(&engine, "u1").await.unwrap();
        assert_eq!(report.candidates.len(), 1);

        apply(&engine, &report).await.unwrap();

        let updated = engine.record_store.get(memory.id).await.unwrap().unwrap();
        assert!(updated.summarized);
        assert!(updated.char_count <= 210);
        assert_eq!(
            updated.metadata.get(reserved_metadata_keys::ORIGINAL_TEXT).and_then(|v| v.as_str()),
            Some(long_text.as_str())
        );
    }

    #[test]
    fn extractive_summary_stops_near_target_length() {
        let text = "One. Two. Three. Four. Five.".repeat(10);
        let summary = extractive_summary(&text, 20);
        assert!(summary.chars().count() <= 30);
    }

    #[tokio::test]
    async fn summarize_by_concept_ignores_age_and_length_floor() {
        let engine = MemoryEngine::builder(Config::default()).build();
        let memory = engine
            .add_memory(
                CreateMemoryInput {
                    text: "Short pattern note".into(),
                    memory_concept: Some(crate::types::MemoryConcept::Pattern),
                    agent_id: "a1".into(),
                    user_id: "u1".into(),
                    ..Default::default()
                },
                CancellationToken::new(),
            )
            .await
            .unwrap();
        engine
            .add_memory(
                CreateMemoryInput {
                    text: "Unrelated gotcha note".into(),
                    memory_concept: Some(crate::types::MemoryConcept::Gotcha),
                    agent_id: "a1".into(),
                    user_id: "u1".into(),
                    ..Default::default()
                },
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let report = dry_run_by_concept(&engine, "u1", crate::types::MemoryConcept::Pattern).await.unwrap();
        assert_eq!(report.candidates.len(), 1);
        assert_eq!(report.candidates[0].memory_id, memory.id);

        apply(&engine, &report).await.unwrap();
        let updated = engine.record_store.get(memory.id).await.unwrap().unwrap();
        assert!(updated.summarized);
    }
}
