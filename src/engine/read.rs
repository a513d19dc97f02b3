//! Read path: `GetMemory`, listing, search, progressive disclosure (spec §4.4)

use chrono::Utc;

use crate::error::{MemoriaError, Result};
use crate::types::{
    Cursor, Facets, IndexHit, Memory, MemoryConcept, MemoryFilter, MemoryId, MemoryType, Page,
    Requester, SearchHit, SortOrder,
};

use super::{language, CancellationToken, MemoryEngine};

/// `exp(-age_days/tau)`, `tau` defaulting to 30 (spec §4.4, §6 `search.recency_tau_days`).
fn recency_score(created_at: chrono::DateTime<Utc>, now: chrono::DateTime<Utc>, tau_days: f32) -> f32 {
    let age_days = (now - created_at).num_seconds() as f32 / 86_400.0;
    (-age_days.max(0.0) / tau_days).exp()
}

/// Crude whole-word lexical overlap score in `[0, 1]`: fraction of query
/// terms present in the memory text. Adequate alongside the TF-IDF
/// embedder's own lexical signal for the `SearchLexical`/hybrid paths.
fn lexical_score(query: &str, text: &str) -> f32 {
    let text_lower = text.to_lowercase();
    let terms: Vec<&str> = query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .collect();
    if terms.is_empty() {
        return 0.0;
    }
    let hits = terms.iter().filter(|term| text_lower.contains(*term)).count();
    hits as f32 / terms.len() as f32
}

/// Stable tie-break: score desc, then `created_at` desc, then `id` asc (spec §4.4).
fn sort_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.memory.created_at.cmp(&a.memory.created_at))
            .then_with(|| a.memory.id.cmp(&b.memory.id))
    });
}

impl MemoryEngine {
    /// Tenant boundary first, then sharing rules (spec §4.4, §4.6).
    fn is_visible(&self, memory: &Memory, requester: &Requester) -> bool {
        if !memory.is_read_visible_lifecycle(Utc::now()) {
            return false;
        }
        self.sharing.check_access(memory, requester).0
    }

    /// `GetMemory`: `NotFound` if absent, deleted, archived/expired, or not
    /// visible to `requester` (tenant boundary and visibility are
    /// indistinguishable from the caller's point of view, per spec §4.4).
    pub async fn get_memory(&self, id: MemoryId, requester: &Requester) -> Result<Memory> {
        let memory = self
            .record_store
            .get(id)
            .await?
            .ok_or_else(|| MemoriaError::NotFound(format!("memory {}", id)))?;
        if !self.is_visible(&memory, requester) {
            return Err(MemoriaError::NotFound(format!("memory {}", id)));
        }
        Ok(memory)
    }

    /// `ListMemories`: cursor-paginated, filtered, then visibility-checked.
    pub async fn list_memories(
        &self,
        mut filter: MemoryFilter,
        requester: &Requester,
        limit: usize,
        cursor: Option<&Cursor>,
    ) -> Result<Page<Memory>> {
        filter.user_id = Some(requester.user_id.clone());
        let page = self
            .record_store
            .query(&filter, SortOrder::CreatedAtDesc, limit, cursor)
            .await?;
        let items = page
            .items
            .into_iter()
            .filter(|m| self.is_visible(m, requester))
            .collect();
        Ok(Page {
            items,
            next_cursor: page.next_cursor,
        })
    }

    /// `SearchLexical`: whole-word overlap scoring over the tenant's visible memories.
    pub async fn search_lexical(
        &self,
        query: &str,
        requester: &Requester,
        limit: usize,
        cancel: CancellationToken,
    ) -> Result<Vec<SearchHit>> {
        let filter = MemoryFilter {
            user_id: Some(requester.user_id.clone()),
            ..Default::default()
        };
        let page = self
            .record_store
            .query(&filter, SortOrder::CreatedAtDesc, usize::MAX, None)
            .await?;

        cancel.check()?;
        let mut hits: Vec<SearchHit> = page
            .items
            .into_iter()
            .filter(|m| self.is_visible(m, requester))
            .filter_map(|memory| {
                let score = lexical_score(query, &memory.text);
                (score > 0.0).then(|| SearchHit {
                    score,
                    lexical_score: Some(score),
                    semantic_score: None,
                    recency_score: None,
                    memory,
                })
            })
            .collect();

        sort_hits(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    /// `SearchSemantic`: embeds the query, over-fetches from the vector
    /// store, and post-filters by tenant/visibility the same way the
    /// dedup probe does (see [`super::write`]).
    pub async fn search_semantic(
        &self,
        query: &str,
        requester: &Requester,
        limit: usize,
        cancel: CancellationToken,
    ) -> Result<Vec<SearchHit>> {
        cancel.check()?;
        let embedding = self.embedder.embed(query).await?;
        let candidates = self.vector_store.search(&embedding, limit.saturating_mul(4).max(20)).await?;

        let mut hits = Vec::new();
        for (candidate_id, score) in candidates {
            let Some(memory) = self.record_store.get(candidate_id).await? else {
                continue;
            };
            if !self.is_visible(&memory, requester) {
                continue;
            }
            hits.push(SearchHit {
                score,
                semantic_score: Some(score),
                lexical_score: None,
                recency_score: None,
                memory,
            });
            if hits.len() >= limit {
                break;
            }
        }

        sort_hits(&mut hits);
        Ok(hits)
    }

    /// `SearchHybrid`: weighted sum of semantic, lexical, and recency
    /// scores (spec §4.4, §6 `search.weights`, default `{0.5, 0.3, 0.2}`).
    pub async fn search_hybrid(
        &self,
        query: &str,
        requester: &Requester,
        limit: usize,
        cancel: CancellationToken,
    ) -> Result<Vec<SearchHit>> {
        cancel.check()?;
        let weights = self.config.search.weights;
        let tau_days = self.config.search.recency_tau_days as f32;

        let embedding = self.embedder.embed(query).await?;
        let candidates = self
            .vector_store
            .search(&embedding, limit.saturating_mul(6).max(40))
            .await?;

        let now = Utc::now();
        let mut hits = Vec::new();
        for (candidate_id, semantic_score) in candidates {
            let Some(memory) = self.record_store.get(candidate_id).await? else {
                continue;
            };
            if !self.is_visible(&memory, requester) {
                continue;
            }
            let lexical = lexical_score(query, &memory.text);
            let recency = recency_score(memory.created_at, now, tau_days);
            let score = weights.semantic * semantic_score + weights.lexical * lexical + weights.recency * recency;
            hits.push(SearchHit {
                score,
                semantic_score: Some(semantic_score),
                lexical_score: Some(lexical),
                recency_score: Some(recency),
                memory,
            });
        }

        sort_hits(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    /// `SearchIndex` (Layer 1 progressive disclosure, spec §4.4): a compact
    /// hit shape meant to cost ~75-100 tokens each, driven by the same
    /// hybrid ranking as [`MemoryEngine::search_hybrid`].
    pub async fn search_index(
        &self,
        query: &str,
        requester: &Requester,
        limit: usize,
        cancel: CancellationToken,
    ) -> Result<Vec<IndexHit>> {
        let hits = self.search_hybrid(query, requester, limit, cancel).await?;
        Ok(hits.iter().map(|hit| IndexHit::from(&hit.memory)).collect())
    }

    /// `GetTimeline` (Layer 2 progressive disclosure, spec §4.4): full
    /// memories for a session in chronological order.
    pub async fn get_timeline(
        &self,
        session_id: crate::types::SessionId,
        requester: &Requester,
    ) -> Result<Vec<Memory>> {
        let filter = MemoryFilter {
            user_id: Some(requester.user_id.clone()),
            session_id: Some(session_id),
            ..Default::default()
        };
        let page = self
            .record_store
            .query(&filter, SortOrder::CreatedAtDesc, usize::MAX, None)
            .await?;
        let mut items: Vec<Memory> = page
            .items
            .into_iter()
            .filter(|m| self.is_visible(m, requester))
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(items)
    }

    /// `GetMemoryBatch` (Layer 3 progressive disclosure, spec §4.4): full
    /// records for an explicit id set, silently dropping ids the requester
    /// cannot see rather than failing the whole batch.
    pub async fn get_memory_batch(&self, ids: &[MemoryId], requester: &Requester) -> Result<Vec<Memory>> {
        let memories = self.record_store.bulk_get(ids).await?;
        Ok(memories.into_iter().filter(|m| self.is_visible(m, requester)).collect())
    }

    /// `CrossLanguageSearch`: hybrid search with an affinity multiplier
    /// applied per result language (spec §4.4). The query's language is
    /// detected internally (the same detector `AddMemory` uses): `1.0` for
    /// an exact match to the detected language, `0.7` for another
    /// Latin-script language this engine recognizes, `0.5` otherwise.
    pub async fn cross_language_search(
        &self,
        query: &str,
        requester: &Requester,
        limit: usize,
        cancel: CancellationToken,
    ) -> Result<Vec<SearchHit>> {
        let query_language = self.language_detector.detect(query).language_code;
        let mut hits = self.search_hybrid(query, requester, limit.saturating_mul(3).max(limit), cancel).await?;

        for hit in &mut hits {
            let affinity = if hit.memory.language_code == query_language {
                1.0
            } else if language::supported_languages().contains(&hit.memory.language_code.as_str()) {
                0.7
            } else {
                0.5
            };
            hit.score *= affinity;
        }

        sort_hits(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    /// `SearchByType` (Structured group, spec §6): thin `ListMemories` filter.
    pub async fn search_by_type(&self, memory_type: MemoryType, requester: &Requester, limit: usize) -> Result<Vec<Memory>> {
        let filter = MemoryFilter {
            memory_type: Some(memory_type),
            ..Default::default()
        };
        let page = self.list_memories(filter, requester, limit, None).await?;
        Ok(page.items)
    }

    /// `SearchByConcept` (Structured group, spec §6).
    pub async fn search_by_concept(&self, memory_concept: MemoryConcept, requester: &Requester, limit: usize) -> Result<Vec<Memory>> {
        let filter = MemoryFilter {
            memory_concept: Some(memory_concept),
            ..Default::default()
        };
        let page = self.list_memories(filter, requester, limit, None).await?;
        Ok(page.items)
    }

    /// `SearchByFile` (Structured group, spec §6): memories referencing `file`.
    pub async fn search_by_file(&self, file: &str, requester: &Requester, limit: usize) -> Result<Vec<Memory>> {
        let filter = MemoryFilter {
            file: Some(file.to_string()),
            ..Default::default()
        };
        let page = self.list_memories(filter, requester, limit, None).await?;
        Ok(page.items)
    }

    /// `DetectLanguage` (spec §6): the same detector `AddMemory` runs
    /// internally, exposed as a standalone read.
    pub fn detect_language(&self, text: &str) -> language::Detection {
        self.language_detector.detect(text)
    }

    /// `GetSupportedLanguages` (spec §6).
    pub fn supported_languages(&self) -> &'static [&'static str] {
        language::supported_languages()
    }

    /// `GetSharedMemories` (spec §4.6): `ListMemories` with the visibility
    /// filter inverted to "not own" — every memory `requester` can see by
    /// virtue of sharing rather than ownership.
    pub async fn get_shared_memories(
        &self,
        requester: &Requester,
        limit: usize,
        cursor: Option<&Cursor>,
    ) -> Result<Page<Memory>> {
        let filter = MemoryFilter {
            user_id: Some(requester.user_id.clone()),
            ..Default::default()
        };
        let page = self.record_store.query(&filter, SortOrder::CreatedAtDesc, limit, cursor).await?;
        let items = page
            .items
            .into_iter()
            .filter(|m| m.is_read_visible_lifecycle(Utc::now()))
            .filter(|m| {
                let (visible, reason) = self.sharing.check_access(m, requester);
                visible && reason != crate::sharing::AccessReason::Owner
            })
            .collect();
        Ok(Page {
            items,
            next_cursor: page.next_cursor,
        })
    }

    /// `GetFacets`: counts over the tenant's currently visible memories.
    pub async fn get_facets(&self, requester: &Requester) -> Result<Facets> {
        let filter = MemoryFilter {
            user_id: Some(requester.user_id.clone()),
            ..Default::default()
        };
        let page = self
            .record_store
            .query(&filter, SortOrder::CreatedAtDesc, usize::MAX, None)
            .await?;

        let mut facets = Facets::default();
        for memory in page.items.into_iter().filter(|m| self.is_visible(m, requester)) {
            *facets.by_language.entry(memory.language_code.clone()).or_insert(0) += 1;
            *facets.by_type.entry(memory.memory_type.as_str().to_string()).or_insert(0) += 1;
            *facets.by_concept.entry(memory.memory_concept.as_str().to_string()).or_insert(0) += 1;
            if let crate::types::SharePolicy::CategoryShared { category } = &memory.share_policy {
                *facets.by_category.entry(category.clone()).or_insert(0) += 1;
            }
        }
        Ok(facets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::CancellationToken;
    use crate::types::CreateMemoryInput;

    fn engine() -> MemoryEngine {
        MemoryEngine::builder(Config::default()).build()
    }

    fn input(text: &str) -> CreateMemoryInput {
        CreateMemoryInput {
            text: text.to_string(),
            agent_id: "a1".to_string(),
            user_id: "u1".to_string(),
            ..Default::default()
        }
    }

    fn requester() -> Requester {
        Requester {
            user_id: "u1".into(),
            agent_id: "a1".into(),
        }
    }

    #[tokio::test]
    async fn get_memory_hides_other_tenants_memory() {
        let engine = engine();
        let memory = engine.add_memory(input("hello"), CancellationToken::new()).await.unwrap();
        let other = Requester {
            user_id: "u2".into(),
            agent_id: "a1".into(),
        };
        let result = engine.get_memory(memory.id, &other).await;
        assert!(matches!(result, Err(MemoriaError::NotFound(_))));
    }

    #[tokio::test]
    async fn lexical_search_finds_matching_term() {
        let engine = engine();
        engine.add_memory(input("We use JWT for authentication"), CancellationToken::new()).await.unwrap();
        engine.add_memory(input("The sky is blue"), CancellationToken::new()).await.unwrap();

        let hits = engine
            .search_lexical("JWT authentication", &requester(), 10, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].memory.text.contains("JWT"));
    }

    #[tokio::test]
    async fn list_memories_excludes_other_tenant_rows() {
        let engine = engine();
        engine.add_memory(input("mine"), CancellationToken::new()).await.unwrap();
        engine
            .add_memory(
                CreateMemoryInput {
                    text: "theirs".into(),
                    agent_id: "a2".into(),
                    user_id: "u2".into(),
                    ..Default::default()
                },
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let page = engine
            .list_memories(MemoryFilter::default(), &requester(), 10, None)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].text, "mine");
    }

    #[tokio::test]
    async fn get_facets_counts_by_type() {
        let engine = engine();
        engine.add_memory(input("Fixed a crash in the parser"), CancellationToken::new()).await.unwrap();
        engine.add_memory(input("Fixed another bug today"), CancellationToken::new()).await.unwrap();

        let facets = engine.get_facets(&requester()).await.unwrap();
        assert_eq!(facets.by_type.get("bugfix").copied().unwrap_or(0), 2);
    }

    #[tokio::test]
    async fn get_memory_batch_drops_inaccessible_ids() {
        let engine = engine();
        let mine = engine.add_memory(input("mine"), CancellationToken::new()).await.unwrap();
        let theirs = engine
            .add_memory(
                CreateMemoryInput {
                    text: "theirs".into(),
                    agent_id: "a2".into(),
                    user_id: "u2".into(),
                    ..Default::default()
                },
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let batch = engine.get_memory_batch(&[mine.id, theirs.id], &requester()).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, mine.id);
    }

    #[tokio::test]
    async fn search_by_type_filters_to_one_type() {
        let engine = engine();
        engine.add_memory(input("Fixed a crash in the parser"), CancellationToken::new()).await.unwrap();
        engine.add_memory(input("We decided to use JWT for auth"), CancellationToken::new()).await.unwrap();

        let hits = engine
            .search_by_type(crate::types::MemoryType::Bugfix, &requester(), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].text.contains("crash"));
    }

    #[tokio::test]
    async fn search_by_file_finds_referencing_memories() {
        let engine = engine();
        engine
            .add_memory(
                CreateMemoryInput {
                    text: "Touched src/main.rs for the fix".into(),
                    files: Some(vec!["src/main.rs".to_string()]),
                    ..input("ignored")
                },
                CancellationToken::new(),
            )
            .await
            .unwrap();
        engine.add_memory(input("unrelated note"), CancellationToken::new()).await.unwrap();

        let hits = engine.search_by_file("src/main.rs", &requester(), 10).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn detect_language_and_supported_languages_are_exposed() {
        let engine = engine();
        let detection = engine.detect_language("the quick brown fox jumps over the lazy dog for the afternoon");
        assert_eq!(detection.language_code, "en");
        assert!(engine.supported_languages().contains(&"en"));
    }

    #[tokio::test]
    async fn get_shared_memories_excludes_own_private_notes() {
        let engine = engine();
        engine.add_memory(input("my own private note"), CancellationToken::new()).await.unwrap();
        engine
            .add_memory(
                CreateMemoryInput {
                    text: "shared with the whole tenant".into(),
                    agent_id: "a2".into(),
                    user_id: "u1".into(),
                    share_policy: Some(crate::types::SharePolicy::Shared),
                    ..Default::default()
                },
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let page = engine.get_shared_memories(&requester(), 10, None).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].text, "shared with the whole tenant");
    }
}
