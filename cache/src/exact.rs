use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::error::AppError;
use common::storage::db::SurrealDbClient;
use common::stored_object;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{normalize_key, Cache};

const DEFAULT_TTL_SECONDS: i64 = 3600;

stored_object!(CacheEntry, "cache_entry", {
    content: String,
    model_tag: String,
    expires_at: DateTime<Utc>
});

fn entry_id(model_tag: &str, normalized_key: &str) -> String {
    let digest = Sha256::digest(format!("{model_tag}\u{0}{normalized_key}").as_bytes());
    format!("{digest:x}")
}

/// `(normalised_key, model_tag)`-keyed cache with a TTL. Backed by a single
/// `cache_entry` table; each entry's id is the hash of its key so lookup is
/// a direct point-read rather than a scan.
pub struct ExactCache {
    db: SurrealDbClient,
    default_ttl_seconds: i64,
}

impl ExactCache {
    pub fn new(db: SurrealDbClient) -> Self {
        Self {
            db,
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
        }
    }

    pub fn with_default_ttl(db: SurrealDbClient, default_ttl_seconds: i64) -> Self {
        Self {
            db,
            default_ttl_seconds,
        }
    }
}

#[async_trait]
impl Cache for ExactCache {
    async fn lookup(&self, key: &str, model_tag: &str) -> Result<Option<String>, AppError> {
        let id = entry_id(model_tag, &normalize_key(key));
        let entry: Option<CacheEntry> = self.db.get_item(&id).await?;
        match entry {
            Some(entry) if entry.expires_at > Utc::now() => Ok(Some(entry.content)),
            Some(_) => {
                debug!(model_tag, "exact cache hit expired");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        key: &str,
        content: &str,
        model_tag: &str,
        ttl_seconds: Option<i64>,
    ) -> Result<(), AppError> {
        let id = entry_id(model_tag, &normalize_key(key));
        let ttl = ttl_seconds.unwrap_or(self.default_ttl_seconds);
        let now = Utc::now();
        let entry = CacheEntry {
            id,
            created_at: now,
            updated_at: now,
            content: content.to_string(),
            model_tag: model_tag.to_string(),
            expires_at: now + Duration::seconds(ttl),
        };
        let _: Option<CacheEntry> = self
            .db
            .client
            .upsert((CacheEntry::table_name(), entry.id.clone()))
            .content(entry)
            .await?;
        Ok(())
    }

    async fn clear(&self, model_tag: &str) -> Result<(), AppError> {
        self.db
            .client
            .query("DELETE FROM cache_entry WHERE model_tag = $model_tag;")
            .bind(("model_tag", model_tag.to_string()))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn cache() -> ExactCache {
        let db = SurrealDbClient::memory("exact_cache_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");
        ExactCache::new(db)
    }

    #[tokio::test]
    async fn miss_then_hit_after_update() {
        let cache = cache().await;
        assert!(cache.lookup("What is hypertension?", "gpt-4").await.unwrap().is_none());

        cache
            .update("What is hypertension?", "answer text", "gpt-4", None)
            .await
            .unwrap();

        let hit = cache.lookup("  WHAT IS HYPERTENSION?  ", "gpt-4").await.unwrap();
        assert_eq!(hit, Some("answer text".to_string()));
    }

    #[tokio::test]
    async fn different_model_tag_is_a_miss() {
        let cache = cache().await;
        cache.update("q", "a", "gpt-4", None).await.unwrap();
        assert!(cache.lookup("q", "gemini-1.5-flash").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss() {
        let cache = cache().await;
        cache.update("q", "a", "gpt-4", Some(-1)).await.unwrap();
        assert!(cache.lookup("q", "gpt-4").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_removes_only_matching_model_tag() {
        let cache = cache().await;
        cache.update("q", "a", "gpt-4", None).await.unwrap();
        cache.update("q", "a", "gemini-1.5-flash", None).await.unwrap();

        cache.clear("gpt-4").await.unwrap();
        assert!(cache.lookup("q", "gpt-4").await.unwrap().is_none());
        assert!(cache.lookup("q", "gemini-1.5-flash").await.unwrap().is_some());
    }
}
