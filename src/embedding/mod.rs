//! Embedding & LLM client (spec §4.2)
//!
//! `Embedder` and `Completer` are split into separate capabilities (the
//! teacher's `Embedder` trait covers only embedding) since the spec treats
//! embed and complete as orthogonal calls with independent failure modes.

pub mod cache;
pub mod openai;
pub mod ratelimit;
pub mod tfidf;

pub use cache::CachingEmbedder;
pub use openai::OpenAiClient;
pub use ratelimit::TokenBucket;
pub use tfidf::TfIdfEmbedder;

use async_trait::async_trait;

use crate::error::Result;

/// Per-call cost reported to the caller and persisted by the engine (spec §4.2).
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct CallCost {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub usd: f64,
}

#[async_trait]
pub trait Embedder: Send + Sync {
    /// `D` is fixed at startup and recorded in the vector store.
    fn dimensions(&self) -> usize;
    fn model_name(&self) -> &str;
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, prompt: &str, input: &str, max_tokens: usize) -> Result<(String, CallCost)>;
}

/// Cosine similarity rescaled from `[-1, 1]` to `[0, 1]`, matching the
/// vector store's score range (spec §4.1).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    crate::storage::vector::cosine_similarity(a, b)
}

/// SHA-256 of normalized (trimmed, lowercased) text; the caching key for
/// embeddings (spec §4.2) and the fingerprint lock input (spec §4.3).
pub fn normalized_text_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let normalized = text.trim().to_lowercase();
    let digest = Sha256::digest(normalized.as_bytes());
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_hash_ignores_case_and_surrounding_whitespace() {
        assert_eq!(
            normalized_text_hash("  Hello World  "),
            normalized_text_hash("hello world")
        );
    }
}
