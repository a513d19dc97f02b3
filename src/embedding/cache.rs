//! Caches embeddings by SHA-256 of normalized text (spec §4.2)

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use crate::error::Result;

use super::{normalized_text_hash, Embedder};

pub struct CachingEmbedder {
    inner: Arc<dyn Embedder>,
    cache: DashMap<String, Vec<f32>>,
}

impl CachingEmbedder {
    pub fn new(inner: Arc<dyn Embedder>) -> Self {
        CachingEmbedder {
            inner,
            cache: DashMap::new(),
        }
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}

#[async_trait]
impl Embedder for CachingEmbedder {
    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = normalized_text_hash(text);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached.clone());
        }
        let vector = self.inner.embed(text).await?;
        self.cache.insert(key, vector.clone());
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::TfIdfEmbedder;

    #[tokio::test]
    async fn second_call_hits_cache() {
        let embedder = CachingEmbedder::new(Arc::new(TfIdfEmbedder::new(64)));
        embedder.embed("hello world").await.unwrap();
        assert_eq!(embedder.cached_len(), 1);
        embedder.embed("Hello World").await.unwrap();
        assert_eq!(embedder.cached_len(), 1, "normalized text should share a cache entry");
    }
}
