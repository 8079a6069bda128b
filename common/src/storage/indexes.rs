use tracing::debug;

use crate::error::AppError;
use crate::storage::db::SurrealDbClient;

const FTS_ANALYZER_NAME: &str = "app_en_fts_analyzer";

/// Default table names for the two canonical collections, used by tests and
/// as `AppConfig`'s defaults. Production table names come from
/// `AppConfig::collection_name_s`/`collection_name_u` (§6's
/// `COLLECTION_NAME_S`/`COLLECTION_NAME_U`), not these literals.
pub const DEFAULT_COLLECTION_TABLES: [&str; 2] = ["chunk_structured", "chunk_unstructured"];

/// Defines, for every collection table named in `tables`: an HNSW index
/// over `embedding` (the similarity/mmr/threshold strategies), a BM25
/// full-text index over `text` (the BM25 variant and `ensemble` strategy),
/// and a plain index over `metadata.id` (open question in the design
/// notes: the original scans the full collection for
/// `delete_by_metadata_id`; here it's an indexed lookup). Idempotent — safe
/// to call on every boot.
pub async fn ensure_indexes(db: &SurrealDbClient, embedding_dimension: usize, tables: &[String]) -> Result<(), AppError> {
    create_fts_analyzer(db).await?;

    for table in tables {
        db.client
            .query(format!(
                "DEFINE INDEX IF NOT EXISTS idx_{table}_embedding ON TABLE {table} \
                 FIELDS embedding HNSW DIMENSION {embedding_dimension} DIST COSINE TYPE F32 EFC 100 M 8;"
            ))
            .await?;

        db.client
            .query(format!(
                "DEFINE INDEX IF NOT EXISTS idx_{table}_text ON TABLE {table} \
                 FIELDS text SEARCH ANALYZER {FTS_ANALYZER_NAME} BM25(1.5,0.75);"
            ))
            .await?;

        db.client
            .query(format!(
                "DEFINE INDEX IF NOT EXISTS idx_{table}_metadata_id ON TABLE {table} FIELDS metadata.id;"
            ))
            .await?;

        debug!(table = table.as_str(), "ensured collection indexes");
    }

    Ok(())
}

/// Defines the HNSW index backing the semantic cache's nearest-neighbour
/// lookup. Kept separate from `ensure_indexes` since the cache crate
/// constructs its own table independent of the document collections.
pub async fn ensure_cache_index(db: &SurrealDbClient, embedding_dimension: usize) -> Result<(), AppError> {
    db.client
        .query(format!(
            "DEFINE INDEX IF NOT EXISTS idx_cache_entry_semantic_embedding ON TABLE cache_entry_semantic \
             FIELDS embedding HNSW DIMENSION {embedding_dimension} DIST COSINE TYPE F32 EFC 100 M 8;"
        ))
        .await?;
    Ok(())
}

async fn create_fts_analyzer(db: &SurrealDbClient) -> Result<(), AppError> {
    db.client
        .query(format!(
            "DEFINE ANALYZER IF NOT EXISTS {FTS_ANALYZER_NAME} \
             TOKENIZERS class FILTERS lowercase, ascii, snowball(english);"
        ))
        .await?;
    Ok(())
}
