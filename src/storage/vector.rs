//! VectorStore capability (spec §4.1)

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::Result;
use crate::types::MemoryId;

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, id: MemoryId, vector: Vec<f32>, payload: serde_json::Value) -> Result<()>;
    async fn delete(&self, id: MemoryId) -> Result<()>;
    /// Returns `(id, score)` pairs, `score` in `[0, 1]`, best first.
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<(MemoryId, f32)>>;
    async fn nearby(&self, id: MemoryId, k: usize) -> Result<Vec<(MemoryId, f32)>>;
    /// Cheap liveness probe for the `Health` operation (spec §6).
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Cosine similarity rescaled from `[-1, 1]` to `[0, 1]` per spec §4.1.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    ((dot / (norm_a * norm_b)) + 1.0) / 2.0
}

struct Entry {
    vector: Vec<f32>,
    #[allow(dead_code)]
    payload: serde_json::Value,
}

/// Brute-force cosine-scan vector store. Adequate at the scale this crate
/// targets; an ANN index is a drop-in replacement behind the same trait.
#[derive(Default)]
pub struct InMemoryVectorStore {
    entries: DashMap<MemoryId, Entry>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, id: MemoryId, vector: Vec<f32>, payload: serde_json::Value) -> Result<()> {
        self.entries.insert(id, Entry { vector, payload });
        Ok(())
    }

    async fn delete(&self, id: MemoryId) -> Result<()> {
        self.entries.remove(&id);
        Ok(())
    }

    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<(MemoryId, f32)>> {
        let mut scored: Vec<(MemoryId, f32)> = self
            .entries
            .iter()
            .map(|entry| (*entry.key(), cosine_similarity(vector, &entry.value().vector)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    async fn nearby(&self, id: MemoryId, k: usize) -> Result<Vec<(MemoryId, f32)>> {
        let Some(entry) = self.entries.get(&id) else {
            return Ok(vec![]);
        };
        let vector = entry.value().vector.clone();
        drop(entry);
        let mut scored = self.search(&vector, k + 1).await?;
        scored.retain(|(candidate_id, _)| *candidate_id != id);
        scored.truncate(k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn identical_vectors_score_one() {
        let v = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_score_half() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!((cosine_similarity(&a, &b) - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn search_orders_best_first() {
        let store = InMemoryVectorStore::new();
        let id_a = Uuid::new_v4();
        let id_b = Uuid::new_v4();
        store.upsert(id_a, vec![1.0, 0.0], serde_json::json!({})).await.unwrap();
        store.upsert(id_b, vec![0.0, 1.0], serde_json::json!({})).await.unwrap();
        let results = store.search(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(results[0].0, id_a);
    }

    #[tokio::test]
    async fn delete_removes_from_search_results() {
        let store = InMemoryVectorStore::new();
        let id = Uuid::new_v4();
        store.upsert(id, vec![1.0, 0.0], serde_json::json!({})).await.unwrap();
        store.delete(id).await.unwrap();
        let results = store.search(&[1.0, 0.0], 10).await.unwrap();
        assert!(results.is_empty());
    }
}
