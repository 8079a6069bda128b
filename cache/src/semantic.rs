use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::error::AppError;
use common::storage::db::SurrealDbClient;
use common::storage::indexes::ensure_cache_index;
use common::stored_object;
use common::utils::embedding::Embedder;
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::Cache;

const DEFAULT_SCORE_THRESHOLD: f32 = 0.7;

stored_object!(SemanticCacheEntry, "cache_entry_semantic", {
    content: String,
    model_tag: String,
    embedding: Vec<f32>
});

#[derive(Debug, Deserialize)]
struct ScoredId {
    id: String,
    score: f32,
}

/// Nearest-neighbour cache: a lookup embeds the incoming key and returns the
/// content of the closest entry in the same `model_tag` partition whose
/// cosine similarity clears `score_threshold`.
pub struct SemanticCache {
    db: SurrealDbClient,
    embedder: Arc<dyn Embedder>,
    score_threshold: f32,
}

impl SemanticCache {
    pub async fn new(db: SurrealDbClient, embedder: Arc<dyn Embedder>) -> Result<Self, AppError> {
        Self::with_threshold(db, embedder, DEFAULT_SCORE_THRESHOLD).await
    }

    pub async fn with_threshold(
        db: SurrealDbClient,
        embedder: Arc<dyn Embedder>,
        score_threshold: f32,
    ) -> Result<Self, AppError> {
        ensure_cache_index(&db, embedder.dimension()).await?;
        Ok(Self {
            db,
            embedder,
            score_threshold,
        })
    }
}

#[async_trait]
impl Cache for SemanticCache {
    async fn lookup(&self, key: &str, model_tag: &str) -> Result<Option<String>, AppError> {
        let embedding = self.embedder.embed_query(key).await?;

        let mut response = self
            .db
            .client
            .query(
                "SELECT id, vector::similarity::cosine(embedding, $embedding) AS score \
                 FROM cache_entry_semantic \
                 WHERE model_tag = $model_tag AND embedding <|1,100|> $embedding \
                 ORDER BY score DESC LIMIT 1;",
            )
            .bind(("embedding", embedding))
            .bind(("model_tag", model_tag.to_string()))
            .await?;
        let candidates: Vec<ScoredId> = response.take(0)?;

        let Some(best) = candidates.into_iter().next() else {
            return Ok(None);
        };
        if best.score < self.score_threshold {
            debug!(model_tag, score = best.score, "semantic cache miss below threshold");
            return Ok(None);
        }

        let raw_id = best.id.rsplit(':').next().unwrap_or(&best.id).trim_matches('⟨').trim_matches('⟩');
        let entry: Option<SemanticCacheEntry> = self.db.get_item(raw_id).await?;
        Ok(entry.map(|e| e.content))
    }

    async fn update(
        &self,
        key: &str,
        content: &str,
        model_tag: &str,
        _ttl_seconds: Option<i64>,
    ) -> Result<(), AppError> {
        let embedding = self.embedder.embed_query(key).await?;
        let now = Utc::now();
        let entry = SemanticCacheEntry {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            content: content.to_string(),
            model_tag: model_tag.to_string(),
            embedding,
        };
        self.db.store_item(entry).await?;
        Ok(())
    }

    async fn clear(&self, model_tag: &str) -> Result<(), AppError> {
        self.db
            .client
            .query("DELETE FROM cache_entry_semantic WHERE model_tag = $model_tag;")
            .bind(("model_tag", model_tag.to_string()))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::utils::embedding::HashedEmbedder;

    async fn cache() -> SemanticCache {
        let db = SurrealDbClient::memory("semantic_cache_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");
        let embedder: Arc<dyn Embedder> = Arc::new(HashedEmbedder::new(16));
        SemanticCache::new(db, embedder).await.expect("cache")
    }

    #[tokio::test]
    async fn exact_embedding_match_hits() {
        let cache = cache().await;
        cache
            .update("low sodium diet", "stick to under 2g sodium daily", "gpt-4", None)
            .await
            .unwrap();

        let hit = cache.lookup("low sodium diet", "gpt-4").await.unwrap();
        assert_eq!(hit, Some("stick to under 2g sodium daily".to_string()));
    }

    #[tokio::test]
    async fn unrelated_query_misses() {
        let cache = cache().await;
        cache.update("low sodium diet", "answer", "gpt-4", None).await.unwrap();

        let hit = cache.lookup("quarterly earnings report", "gpt-4").await.unwrap();
        assert!(hit.is_none());
    }

    #[tokio::test]
    async fn clear_empties_the_partition() {
        let cache = cache().await;
        cache.update("q", "a", "gpt-4", None).await.unwrap();
        cache.clear("gpt-4").await.unwrap();
        assert!(cache.lookup("q", "gpt-4").await.unwrap().is_none());
    }
}
