use async_openai::types::CreateEmbeddingRequestArgs;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::AppError;

/// Maps text to unit-norm vectors. `embed_query` is single-shot;
/// `embed_documents` is batched. Both are pure functions of the underlying
/// model weights — no side effects, no caching inside the trait itself.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, AppError>;
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError>;
    fn dimension(&self) -> usize;
    fn model_tag(&self) -> &str;
}

fn l2_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for component in &mut vector {
            *component /= norm;
        }
    }
    vector
}

/// Production embedder backed by the configured LLM provider's embeddings
/// endpoint.
pub struct OpenAiEmbedder {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
    dimensions: u32,
}

impl OpenAiEmbedder {
    pub fn new(
        client: async_openai::Client<async_openai::config::OpenAIConfig>,
        model: impl Into<String>,
        dimensions: u32,
    ) -> Self {
        Self {
            client,
            model: model.into(),
            dimensions,
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, AppError> {
        if text.trim().is_empty() {
            return Err(AppError::Input("embed_query rejects empty input".into()));
        }

        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .dimensions(self.dimensions)
            .input([text])
            .build()?;

        let response = self.client.embeddings().create(request).await?;
        let embedding = response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Backend("no embedding data received".into()))?
            .embedding;

        Ok(l2_normalize(embedding))
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .dimensions(self.dimensions)
            .input(texts)
            .build()?;

        let response = self.client.embeddings().create(request).await?;
        Ok(response
            .data
            .into_iter()
            .map(|d| l2_normalize(d.embedding))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimensions as usize
    }

    fn model_tag(&self) -> &str {
        &self.model
    }
}

/// Deterministic, network-free embedder used by tests and as a fallback
/// when no provider key is configured. Hashes each token into a fixed-size
/// accumulator rather than using learned weights, so vectors are stable but
/// carry no real semantic signal — adequate for exercising store/retrieve
/// plumbing without a live network call.
pub struct HashedEmbedder {
    dimensions: usize,
}

impl HashedEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

#[async_trait]
impl Embedder for HashedEmbedder {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, AppError> {
        if text.trim().is_empty() {
            return Err(AppError::Input("embed_query rejects empty input".into()));
        }
        Ok(hash_embed(text, self.dimensions))
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        Ok(texts
            .iter()
            .map(|t| hash_embed(t, self.dimensions))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimensions
    }

    fn model_tag(&self) -> &str {
        "hashed-embedder"
    }
}

fn hash_embed(text: &str, dimensions: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimensions];
    for token in text.split_whitespace() {
        let digest = Sha256::digest(token.to_lowercase().as_bytes());
        for (i, component) in vector.iter_mut().enumerate() {
            let byte = digest[i % digest.len()];
            *component += f32::from(byte) - 127.5;
        }
    }
    l2_normalize(vector)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashed_embedder_rejects_empty_query() {
        let embedder = HashedEmbedder::new(16);
        assert!(embedder.embed_query("").await.is_err());
        assert!(embedder.embed_query("   ").await.is_err());
    }

    #[tokio::test]
    async fn hashed_embedder_is_deterministic_and_unit_norm() {
        let embedder = HashedEmbedder::new(32);
        let a = embedder.embed_query("fever and chills").await.unwrap();
        let b = embedder.embed_query("fever and chills").await.unwrap();
        assert_eq!(a, b);
        let norm = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4 || norm == 0.0);
    }

    #[tokio::test]
    async fn hashed_embedder_batches_documents() {
        let embedder = HashedEmbedder::new(8);
        let docs = vec!["alpha".to_string(), "beta".to_string()];
        let vectors = embedder.embed_documents(&docs).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert_ne!(vectors[0], vectors[1]);
    }
}
