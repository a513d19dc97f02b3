//! OpenAI-compatible embedding/completion client (spec §4.2)

use async_trait::async_trait;

use crate::error::{LlmError, MemoriaError, Result};

use super::{CallCost, Completer, Embedder};

pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    embedding_model: String,
    completion_model: String,
    dimensions: usize,
}

impl OpenAiClient {
    pub fn new(api_key: String, embedding_model: String, completion_model: String, dimensions: usize) -> Self {
        OpenAiClient {
            client: reqwest::Client::new(),
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
            embedding_model,
            completion_model,
            dimensions,
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    fn classify_status(status: reqwest::StatusCode, body: &str) -> MemoriaError {
        if status.as_u16() == 429 {
            MemoriaError::Llm(LlmError::RateLimited(1))
        } else if status.is_server_error() {
            MemoriaError::Llm(LlmError::Unavailable(format!("{}: {}", status, body)))
        } else {
            MemoriaError::Llm(LlmError::InvalidResponse(format!("{}: {}", status, body)))
        }
    }
}

#[async_trait]
impl Embedder for OpenAiClient {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.embedding_model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "input": text,
                "model": self.embedding_model,
            }))
            .send()
            .await
            .map_err(|e| MemoriaError::Llm(LlmError::Unavailable(e.to_string())))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &body));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| MemoriaError::Llm(LlmError::InvalidResponse(e.to_string())))?;
        let embedding = data["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| MemoriaError::Llm(LlmError::InvalidResponse("missing embedding field".into())))?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        Ok(embedding)
    }
}

#[async_trait]
impl Completer for OpenAiClient {
    async fn complete(&self, prompt: &str, input: &str, max_tokens: usize) -> Result<(String, CallCost)> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "model": self.completion_model,
                "max_tokens": max_tokens,
                "messages": [
                    {"role": "system", "content": prompt},
                    {"role": "user", "content": input},
                ],
            }))
            .send()
            .await
            .map_err(|e| MemoriaError::Llm(LlmError::Unavailable(e.to_string())))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &body));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| MemoriaError::Llm(LlmError::InvalidResponse(e.to_string())))?;

        let text = data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| MemoriaError::Llm(LlmError::InvalidResponse("missing choice content".into())))?
            .to_string();

        let cost = CallCost {
            input_tokens: data["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            output_tokens: data["usage"]["completion_tokens"].as_u64().unwrap_or(0),
            // Pricing varies per model/provider; the engine persists the
            // token counts and leaves USD conversion to the operator's
            // billing configuration.
            usd: 0.0,
        };

        Ok((text, cost))
    }
}
