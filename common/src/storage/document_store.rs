use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::AppError;
use crate::storage::db::SurrealDbClient;
use crate::storage::indexes;
use crate::storage::types::chunk::{Chunk, ChunkMetadata};
use crate::utils::embedding::Embedder;

/// The two canonical collections a `DocumentStore` can point at. Exactly one
/// is "active" at a time; `add`/`list`/`delete_*` all operate against the
/// active collection's table. The table name each variant maps to is
/// configured at `DocumentStore::new` time (`AppConfig::collection_name_s`/
/// `collection_name_u`), not hard-coded here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Structured,
    Unstructured,
}

impl Collection {
    fn index(self) -> usize {
        match self {
            Collection::Structured => 0,
            Collection::Unstructured => 1,
        }
    }
}

/// A scored chunk as returned by a similarity or BM25 search.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Deserialize)]
struct ScoredId {
    id: String,
    score: f32,
}

/// Persistent store for `Chunk`s across the two named collections.
/// Backed by SurrealDB: each collection is its own table, carrying an HNSW
/// index on `embedding` and a BM25 index on `text` (see
/// `storage::indexes::ensure_indexes`).
pub struct DocumentStore {
    db: SurrealDbClient,
    embedder: Arc<dyn Embedder>,
    active: Collection,
    tables: [String; 2],
}

impl DocumentStore {
    /// `table_structured`/`table_unstructured` are the configured table
    /// names for each collection (`AppConfig::collection_name_s`/
    /// `collection_name_u`, SPEC_FULL §6's `COLLECTION_NAME_S`/
    /// `COLLECTION_NAME_U`).
    pub async fn new(
        db: SurrealDbClient,
        embedder: Arc<dyn Embedder>,
        table_structured: impl Into<String>,
        table_unstructured: impl Into<String>,
    ) -> Result<Self, AppError> {
        let tables = [table_structured.into(), table_unstructured.into()];
        indexes::ensure_indexes(&db, embedder.dimension(), &tables).await?;
        Ok(Self {
            db,
            embedder,
            active: Collection::Structured,
            tables,
        })
    }

    pub fn list_collections(&self) -> &[String] {
        &self.tables
    }

    pub fn set_active(&mut self, collection: Collection) {
        self.active = collection;
    }

    pub fn active(&self) -> Collection {
        self.active
    }

    fn table(&self) -> &str {
        &self.tables[self.active.index()]
    }

    /// Stores `chunks` in the active collection. Any chunk missing an
    /// embedding is embedded first (batched into a single provider call);
    /// every chunk's own id is merged into its metadata so
    /// `delete_by_metadata_id` can find it later. The whole batch commits as
    /// one transaction — partial batches never land.
    pub async fn add(&self, mut chunks: Vec<Chunk>) -> Result<usize, AppError> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let missing: Vec<String> = chunks
            .iter()
            .filter(|c| c.embedding.is_none())
            .map(|c| c.text.clone())
            .collect();

        if !missing.is_empty() {
            let mut embedded = self.embedder.embed_documents(&missing).await?.into_iter();
            for chunk in chunks.iter_mut().filter(|c| c.embedding.is_none()) {
                chunk.embedding = embedded.next();
            }
        }

        for chunk in &mut chunks {
            chunk.metadata.id = Some(chunk.id.clone());
        }

        let table = self.table();
        let mut transaction = String::from("BEGIN TRANSACTION;\n");
        for chunk in &chunks {
            let payload = serde_json::to_value(chunk)?;
            transaction.push_str(&format!(
                "CREATE type::thing('{table}', '{id}') CONTENT {payload};\n",
                id = chunk.id,
                payload = payload
            ));
        }
        transaction.push_str("COMMIT TRANSACTION;");

        self.db.client.query(transaction).await?;
        info!(table, count = chunks.len(), "added chunks");
        Ok(chunks.len())
    }

    pub async fn list(&self) -> Result<Vec<Chunk>, AppError> {
        let table = self.table();
        let mut response = self.db.client.query(format!("SELECT * FROM {table};")).await?;
        let chunks: Vec<Chunk> = response.take(0)?;
        Ok(chunks)
    }

    pub async fn delete_by_id(&self, id: &str) -> Result<(), AppError> {
        let table = self.table();
        let mut response = self
            .db
            .client
            .query(format!("DELETE type::thing('{table}', '{id}') RETURN BEFORE;"))
            .await?;
        let deleted: Vec<Value> = response.take(0)?;
        if deleted.is_empty() {
            warn!(table, id, "delete_by_id found no matching chunk");
        }
        Ok(())
    }

    pub async fn delete_by_metadata_id(&self, metadata_id: &str) -> Result<(), AppError> {
        let table = self.table();
        let mut response = self
            .db
            .client
            .query(format!(
                "DELETE FROM {table} WHERE metadata.id = $metadata_id RETURN BEFORE;"
            ))
            .bind(("metadata_id", metadata_id.to_string()))
            .await?;
        let deleted: Vec<Value> = response.take(0)?;
        if deleted.is_empty() {
            warn!(table, metadata_id, "delete_by_metadata_id found no matching chunk");
        }
        Ok(())
    }

    pub async fn delete_by_source(&self, source: &str) -> Result<usize, AppError> {
        let table = self.table();
        let mut response = self
            .db
            .client
            .query(format!("DELETE FROM {table} WHERE metadata.source = $source RETURN BEFORE;"))
            .bind(("source", source.to_string()))
            .await?;
        let deleted: Vec<Value> = response.take(0)?;
        if deleted.is_empty() {
            warn!(table, source, "delete_by_source found no matching chunks");
        }
        Ok(deleted.len())
    }

    /// Dense-vector KNN search against the active collection. `take` bounds
    /// how many candidates come back from the index before exact-distance
    /// re-sort; the spec's strategies further filter/limit on top of this.
    pub async fn similarity_search(&self, query: &str, take: usize) -> Result<Vec<ScoredChunk>, AppError> {
        let embedding = self.embedder.embed_query(query).await?;
        let table = self.table();

        let query_str = format!(
            "SELECT id, vector::similarity::cosine(embedding, $embedding) AS score FROM {table} \
             WHERE embedding <|{take},100|> $embedding ORDER BY score DESC;"
        );
        let mut response = self.db.client.query(query_str).bind(("embedding", embedding)).await?;
        let scored_ids: Vec<ScoredId> = response.take(0)?;
        self.hydrate(scored_ids).await
    }

    /// BM25 full-text search against the active collection's `text` field.
    pub async fn bm25_search(&self, terms: &str, take: usize) -> Result<Vec<ScoredChunk>, AppError> {
        let table = self.table();
        let query_str = format!(
            "SELECT id, search::score(0) AS score FROM {table} \
             WHERE text @0@ $terms ORDER BY score DESC LIMIT {take};"
        );
        let mut response = self.db.client.query(query_str).bind(("terms", terms.to_string())).await?;
        let scored_ids: Vec<ScoredId> = response.take(0)?;
        self.hydrate(scored_ids).await
    }

    /// Returns every chunk in the active collection whose metadata satisfies
    /// `criteria` (the `filter` retrieval strategy's backing primitive).
    pub async fn filter(&self, criteria: &BTreeMap<String, Value>) -> Result<Vec<Chunk>, AppError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|chunk| chunk.metadata.matches(criteria))
            .collect())
    }

    async fn hydrate(&self, scored_ids: Vec<ScoredId>) -> Result<Vec<ScoredChunk>, AppError> {
        let table = self.table();
        let mut scored_chunks = Vec::with_capacity(scored_ids.len());
        for scored in scored_ids {
            let raw_id = scored.id.rsplit(':').next().unwrap_or(&scored.id).trim_matches('⟨').trim_matches('⟩');
            let mut response = self
                .db
                .client
                .query(format!("SELECT * FROM type::thing('{table}', $id);"))
                .bind(("id", raw_id.to_string()))
                .await?;
            let mut chunks: Vec<Chunk> = response.take(0)?;
            if let Some(chunk) = chunks.pop() {
                scored_chunks.push(ScoredChunk { chunk, score: scored.score });
            }
        }
        Ok(scored_chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::embedding::HashedEmbedder;
    use uuid::Uuid;

    async fn store() -> DocumentStore {
        let db = SurrealDbClient::memory("doc_store_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");
        let embedder: Arc<dyn Embedder> = Arc::new(HashedEmbedder::new(16));
        DocumentStore::new(db, embedder, "chunk_structured", "chunk_unstructured")
            .await
            .expect("store")
    }

    #[tokio::test]
    async fn add_and_list_round_trips() {
        let store = store().await;
        let metadata = ChunkMetadata::new("/docs/a.pdf", 0);
        let chunk = Chunk::new("chunk_0", "low sodium diet guidance", metadata);
        store.add(vec![chunk]).await.expect("add");

        let chunks = store.list().await.expect("list");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata.id.as_deref(), Some("chunk_0"));
    }

    #[tokio::test]
    async fn delete_by_metadata_id_removes_the_chunk() {
        let store = store().await;
        let metadata = ChunkMetadata::new("/docs/a.pdf", 0);
        store.add(vec![Chunk::new("chunk_0", "text", metadata)]).await.unwrap();

        store.delete_by_metadata_id("chunk_0").await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_by_source_removes_all_matching_chunks() {
        let store = store().await;
        store
            .add(vec![
                Chunk::new("chunk_0", "a", ChunkMetadata::new("/docs/a.pdf", 0)),
                Chunk::new("chunk_1", "b", ChunkMetadata::new("/docs/a.pdf", 1)),
                Chunk::new("chunk_2", "c", ChunkMetadata::new("/docs/b.pdf", 0)),
            ])
            .await
            .unwrap();

        let deleted = store.delete_by_source("/docs/a.pdf").await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn similarity_search_returns_scored_chunks() {
        let store = store().await;
        store
            .add(vec![Chunk::new("chunk_0", "fever and chills", ChunkMetadata::new("/docs/a.pdf", 0))])
            .await
            .unwrap();

        let results = store.similarity_search("fever and chills", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].score > 0.9);
    }

    #[tokio::test]
    async fn filter_matches_on_metadata() {
        let store = store().await;
        store
            .add(vec![Chunk::new("chunk_0", "text", ChunkMetadata::new("/docs/a.pdf", 0))])
            .await
            .unwrap();

        let mut criteria = BTreeMap::new();
        criteria.insert("source".to_string(), Value::String("/docs/a.pdf".to_string()));
        let matched = store.filter(&criteria).await.unwrap();
        assert_eq!(matched.len(), 1);

        criteria.insert("source".to_string(), Value::String("/docs/missing.pdf".to_string()));
        assert!(store.filter(&criteria).await.unwrap().is_empty());
    }
}
