//! Embedding provider — HTTP capability provider (Jina AI), trait-isolated
//! so the orchestrator and agent pipeline never depend on a concrete
//! vendor. Batches match the Embed+Index stage's fixed-100-items-per-batch
//! rate shaping.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError>;
    fn dimension(&self) -> usize;
}

pub struct JinaEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponseItem {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedResponseItem>,
}

impl JinaEmbeddingProvider {
    pub fn new(api_key: String) -> Self {
        JinaEmbeddingProvider {
            client: reqwest::Client::new(),
            api_key,
            model: "jina-embeddings-v2-base-code".to_string(),
            dimension: 768,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for JinaEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .client
            .post("https://api.jina.ai/v1/embeddings")
            .bearer_auth(&self.api_key)
            .json(&EmbedRequest { model: &self.model, input: texts })
            .send()
            .await
            .map_err(|e| AppError::ExternalService { service: "jina", message: e.to_string() })?;

        if !response.status().is_success() {
            return Err(AppError::ExternalService {
                service: "jina",
                message: format!("embedding request failed with status {}", response.status()),
            });
        }

        let mut parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| AppError::ExternalService { service: "jina", message: e.to_string() })?;
        parsed.data.sort_by_key(|item| item.index);
        Ok(parsed.data.into_iter().map(|item| item.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic hashing embedding used by tests and the `--no-vector-db`
/// local-dev path, so pipelines can run without a network-connected
/// embedding provider.
pub struct DeterministicEmbeddingProvider {
    dimension: usize,
}

impl DeterministicEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        DeterministicEmbeddingProvider { dimension }
    }
}

#[async_trait]
impl EmbeddingProvider for DeterministicEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        Ok(texts.iter().map(|t| hash_embedding(t, self.dimension)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn hash_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let mut vec = vec![0.0f32; dimension];
    for (i, byte) in text.bytes().enumerate() {
        vec[i % dimension] += byte as f32;
    }
    let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vec {
            *v /= norm;
        }
    }
    vec
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deterministic_provider_is_stable() {
        let provider = DeterministicEmbeddingProvider::new(16);
        let a = provider.embed(&["fn hello() {}".to_string()]).await.unwrap();
        let b = provider.embed(&["fn hello() {}".to_string()]).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn empty_batch_returns_empty() {
        let provider = DeterministicEmbeddingProvider::new(16);
        let out = provider.embed(&[]).await.unwrap();
        assert!(out.is_empty());
    }
}
