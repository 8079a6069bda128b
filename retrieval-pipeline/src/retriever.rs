//! `Retriever`: the strategies from SPEC_FULL §4.4 over a `DocumentStore`.

use std::collections::BTreeMap;
use std::sync::Arc;

use common::error::AppError;
use common::storage::document_store::{DocumentStore, ScoredChunk};
use generator::Generator;
use serde_json::Value;
use tracing::warn;

use crate::bm25::Bm25Index;

const DEFAULT_K: usize = 20;
const DEFAULT_MMR_LAMBDA: f32 = 0.5;

pub struct Retriever {
    store: Arc<DocumentStore>,
    generator: Arc<Generator>,
}

impl Retriever {
    pub fn new(store: Arc<DocumentStore>, generator: Arc<Generator>) -> Self {
        Self { store, generator }
    }

    /// Top-`k` by cosine similarity to the query embedding. Backend errors
    /// are logged and degrade to an empty list — callers must tolerate
    /// that per SPEC_FULL §4.4.
    pub async fn similarity(&self, query: &str, k: usize) -> Vec<ScoredChunk> {
        self.store.similarity_search(query, k).await.unwrap_or_else(|err| {
            warn!(error = %err, "similarity retrieval failed, returning empty result");
            Vec::new()
        })
    }

    /// Fetches `fetch_k` candidates by similarity, then greedily selects
    /// `k` maximising `lambda * sim(q, d) - (1 - lambda) * max_sim(d, picked)`.
    pub async fn mmr(&self, query: &str, k: usize, fetch_k: usize, lambda: f32) -> Vec<ScoredChunk> {
        let candidates = self.similarity(query, fetch_k).await;
        if candidates.is_empty() {
            return Vec::new();
        }

        let mut remaining: Vec<ScoredChunk> = candidates;
        let mut picked: Vec<ScoredChunk> = Vec::new();

        while picked.len() < k && !remaining.is_empty() {
            let (best_idx, _) = remaining
                .iter()
                .enumerate()
                .map(|(i, candidate)| {
                    let max_sim_to_picked = picked
                        .iter()
                        .map(|p| cosine(embedding_of(&candidate), embedding_of(p)))
                        .fold(0.0f32, f32::max);
                    let mmr_score = lambda * candidate.score - (1.0 - lambda) * max_sim_to_picked;
                    (i, mmr_score)
                })
                .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
                .expect("remaining is non-empty");
            picked.push(remaining.remove(best_idx));
        }
        picked
    }

    /// Similarity restricted to chunks scoring at or above `score_threshold`,
    /// capped at `k`.
    pub async fn threshold(&self, query: &str, score_threshold: f32, k: usize) -> Vec<ScoredChunk> {
        self.similarity(query, k)
            .await
            .into_iter()
            .filter(|scored| scored.score >= score_threshold)
            .collect()
    }

    /// Similarity restricted to chunks whose metadata matches every
    /// key/value pair in `criteria`.
    pub async fn filter(&self, query: &str, criteria: &BTreeMap<String, Value>, k: usize) -> Vec<ScoredChunk> {
        let matching = match self.store.filter(criteria).await {
            Ok(chunks) => chunks,
            Err(err) => {
                warn!(error = %err, "filter retrieval failed, returning empty result");
                return Vec::new();
            }
        };
        if matching.is_empty() {
            return Vec::new();
        }

        let corpus: Vec<(String, String)> =
            matching.iter().map(|chunk| (chunk.id.clone(), chunk.text.clone())).collect();
        // Re-rank the metadata-filtered set by lexical relevance to the
        // query; a true embedding re-query would require re-embedding the
        // subset, which the BM25 pass avoids.
        let bm25 = Bm25Index::build(&corpus);
        let mut scored: Vec<ScoredChunk> = matching
            .into_iter()
            .zip(bm25.score_all(query).into_iter().map(|(_, score)| score))
            .map(|(chunk, score)| ScoredChunk { chunk, score })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    /// For each medication and condition the slot-filler extracted from
    /// `query`, retrieves with a fixed-form sub-question; unions the
    /// results preserving first-seen order. Returns the documents plus the
    /// generated sub-questions, for logging.
    pub async fn multi_query(
        &self,
        query: &str,
        age: u32,
        gender: &str,
        k: usize,
    ) -> Result<(Vec<ScoredChunk>, Vec<String>), AppError> {
        let terms = self.generator.multi_query_terms(query).await?;
        let mut generated_queries = Vec::new();
        for medication in &terms.medications {
            generated_queries.push(format!(
                "What are the recommendations for a {age} years old {gender} taking {medication}?"
            ));
        }
        for condition in &terms.conditions {
            generated_queries.push(format!(
                "What are the recommendations for a {age} years old {gender} with {condition}?"
            ));
        }

        let mut seen = std::collections::HashSet::new();
        let mut union = Vec::new();
        for generated in &generated_queries {
            for scored in self.similarity(generated, k).await {
                if seen.insert(scored.chunk.id.clone()) {
                    union.push(scored);
                }
            }
        }
        Ok((union, generated_queries))
    }

    /// Rewrites `query` to a single optimised form via the generator, then
    /// retrieves using the rewrite. Returns the documents plus the
    /// original `query`, for logging.
    pub async fn rephrase(&self, query: &str, k: usize) -> Result<(Vec<ScoredChunk>, String), AppError> {
        let rewritten = self.generator.rephrase(query).await?;
        Ok((self.similarity(&rewritten, k).await, query.to_string()))
    }

    /// Union of dense similarity and BM25 over the in-memory corpus built
    /// from `DocumentStore::list`, weighted 0.5/0.5 and combined via
    /// reciprocal-rank fusion.
    pub async fn ensemble(&self, query: &str, k: usize) -> Vec<ScoredChunk> {
        let corpus = match self.store.list().await {
            Ok(chunks) => chunks,
            Err(err) => {
                warn!(error = %err, "ensemble retrieval failed to list corpus, returning empty result");
                return Vec::new();
            }
        };
        if corpus.is_empty() {
            return Vec::new();
        }

        let dense = self.similarity(query, k.max(corpus.len().min(DEFAULT_K))).await;
        let dense_rank: BTreeMap<String, usize> =
            dense.iter().enumerate().map(|(rank, scored)| (scored.chunk.id.clone(), rank)).collect();

        let bm25_corpus: Vec<(String, String)> =
            corpus.iter().map(|chunk| (chunk.id.clone(), chunk.text.clone())).collect();
        let bm25 = Bm25Index::build(&bm25_corpus);
        let mut bm25_scores = bm25.score_all(query);
        bm25_scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let bm25_rank: BTreeMap<String, usize> =
            bm25_scores.iter().enumerate().map(|(rank, (id, _))| (id.clone(), rank)).collect();

        const RRF_K: f32 = 60.0;
        let mut fused: Vec<(String, f32)> = corpus
            .iter()
            .map(|chunk| {
                let dense_score = dense_rank.get(&chunk.id).map(|rank| 1.0 / (RRF_K + *rank as f32 + 1.0)).unwrap_or(0.0);
                let bm25_score = bm25_rank.get(&chunk.id).map(|rank| 1.0 / (RRF_K + *rank as f32 + 1.0)).unwrap_or(0.0);
                (chunk.id.clone(), 0.5 * dense_score + 0.5 * bm25_score)
            })
            .filter(|(_, score)| *score > 0.0)
            .collect();
        fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        fused.truncate(k);

        let by_id: BTreeMap<String, common::storage::types::chunk::Chunk> =
            corpus.into_iter().map(|chunk| (chunk.id.clone(), chunk)).collect();
        fused
            .into_iter()
            .filter_map(|(id, score)| by_id.get(&id).cloned().map(|chunk| ScoredChunk { chunk, score }))
            .collect()
    }
}

fn embedding_of(scored: &ScoredChunk) -> &[f32] {
    scored.chunk.embedding.as_deref().unwrap_or(&[])
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::db::SurrealDbClient;
    use common::storage::types::chunk::{Chunk, ChunkMetadata};
    use common::utils::embedding::HashedEmbedder;
    use generator::{Generator, StubLlmClient};

    async fn store_with(texts: &[(&str, &str)]) -> Arc<DocumentStore> {
        let db = SurrealDbClient::memory("test", "test").await.unwrap();
        let tables = vec!["chunk_structured".to_string(), "chunk_unstructured".to_string()];
        common::storage::indexes::ensure_indexes(&db, 16, &tables).await.unwrap();
        let embedder: Arc<dyn common::utils::embedding::Embedder> = Arc::new(HashedEmbedder::new(16));
        let store = DocumentStore::new(db, embedder, "chunk_structured", "chunk_unstructured").await.unwrap();
        let chunks = texts
            .iter()
            .enumerate()
            .map(|(i, (id, text))| Chunk::new(id.to_string(), text.to_string(), ChunkMetadata::new("src", i as i64)))
            .collect();
        store.add(chunks).await.unwrap();
        Arc::new(store)
    }

    fn generator(responses: Vec<&str>) -> Arc<Generator> {
        Arc::new(Generator::new(Arc::new(StubLlmClient::new(
            responses.into_iter().map(String::from).collect(),
        ))))
    }

    #[tokio::test]
    async fn similarity_returns_empty_on_no_match_gracefully() {
        let store = store_with(&[("a", "renal dosing guidance")]).await;
        let retriever = Retriever::new(store, generator(vec![]));
        let results = retriever.similarity("renal dosing guidance", 5).await;
        assert!(!results.is_empty());
    }

    #[tokio::test]
    async fn threshold_filters_out_low_scoring_matches() {
        let store = store_with(&[("a", "renal dosing guidance"), ("b", "completely unrelated text")]).await;
        let retriever = Retriever::new(store, generator(vec![]));
        let results = retriever.threshold("renal dosing guidance", 0.99, 10).await;
        assert!(results.len() <= 1);
    }

    #[tokio::test]
    async fn multi_query_generates_one_subquery_per_medication_and_condition() {
        let store = store_with(&[
            ("a", "ciprofloxacin dosing in renal impairment"),
            ("b", "tolterodine and cognitive decline in the elderly"),
        ])
        .await;
        let retriever = Retriever::new(
            store,
            generator(vec![
                r#"{"medications": ["Ciprofloxacin", "Tolterodine", "Brinzolamide"], "conditions": ["dementia", "glaucoma"]}"#,
            ]),
        );

        let (documents, generated_queries) =
            retriever.multi_query("patient profile", 78, "female", 5).await.unwrap();

        assert_eq!(generated_queries.len(), 3 + 2);
        assert!(!documents.is_empty());
    }

    #[tokio::test]
    async fn ensemble_combines_dense_and_lexical_signals() {
        let store = store_with(&[
            ("a", "lisinopril dosing in elderly patients"),
            ("b", "unrelated topic entirely"),
        ])
        .await;
        let retriever = Retriever::new(store, generator(vec![]));
        let results = retriever.ensemble("lisinopril dosing", 5).await;
        assert!(!results.is_empty());
        assert_eq!(results[0].chunk.id, "a");
    }
}
