//! Cross-encoder re-ranking (SPEC_FULL §4.5).
//!
//! Scoring is behind a `CrossEncoderScorer` trait, the same
//! dual-implementation shape as `common::utils::embedding::Embedder` and
//! `generator::LlmClient`: `RerankerPool` runs real `fastembed` inference
//! behind a semaphore-gated pool of model handles (so concurrent turns
//! never race on the same model and a saturated pool backpressures rather
//! than spawning unbounded instances), and `LexicalScorer` gives the test
//! suite a deterministic, network-free stand-in.

use std::cmp::Ordering;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use async_trait::async_trait;
use common::error::AppError;
use common::storage::document_store::ScoredChunk;
use fastembed::{RerankInitOptions, TextRerank};
use serde_json::json;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::bm25::Bm25Index;

/// Scores a query against a batch of candidate texts, one score per text,
/// same order as the input.
#[async_trait]
pub trait CrossEncoderScorer: Send + Sync {
    async fn score_all(&self, query: &str, texts: &[String]) -> Result<Vec<f32>, AppError>;
}

static NEXT_ENGINE: AtomicUsize = AtomicUsize::new(0);

/// A fixed-size pool of `TextRerank` model handles, leased one at a time.
pub struct RerankerPool {
    engines: Vec<Arc<Mutex<TextRerank>>>,
    semaphore: Arc<Semaphore>,
}

impl RerankerPool {
    pub fn new(pool_size: usize, cache_dir: PathBuf) -> Result<Arc<Self>, AppError> {
        if pool_size == 0 {
            return Err(AppError::Config("reranker pool size must be greater than zero".into()));
        }
        fs::create_dir_all(&cache_dir)?;

        let mut init_options = RerankInitOptions::default();
        init_options.cache_dir = cache_dir;

        let mut engines = Vec::with_capacity(pool_size);
        for i in 0..pool_size {
            debug!(engine = i, "creating cross-encoder reranker engine");
            let model = TextRerank::try_new(init_options.clone())
                .map_err(|err| AppError::Internal(format!("failed to load reranker model: {err}")))?;
            engines.push(Arc::new(Mutex::new(model)));
        }

        Ok(Arc::new(Self { engines, semaphore: Arc::new(Semaphore::new(pool_size)) }))
    }

    async fn checkout(&self) -> RerankerLease {
        let permit = self.semaphore.clone().acquire_owned().await.expect("semaphore closed");
        let idx = NEXT_ENGINE.fetch_add(1, AtomicOrdering::Relaxed) % self.engines.len();
        RerankerLease { _permit: permit, engine: self.engines[idx].clone() }
    }
}

struct RerankerLease {
    _permit: OwnedSemaphorePermit,
    engine: Arc<Mutex<TextRerank>>,
}

#[async_trait]
impl CrossEncoderScorer for RerankerPool {
    async fn score_all(&self, query: &str, texts: &[String]) -> Result<Vec<f32>, AppError> {
        let lease = self.checkout().await;
        let mut guard = lease.engine.lock().await;
        let results = guard
            .rerank(query.to_owned(), texts.to_vec(), false, None)
            .map_err(|err| AppError::Internal(format!("reranker inference failed: {err}")))?;
        let mut scores = vec![0.0f32; texts.len()];
        for result in results {
            scores[result.index] = result.score;
        }
        Ok(scores)
    }
}

/// Deterministic, network-free stand-in for [`RerankerPool`]: scores by
/// normalised BM25 lexical overlap rather than a learned cross-encoder.
/// Used by the test suite so reranking can be exercised without loading a
/// real model.
pub struct LexicalScorer;

#[async_trait]
impl CrossEncoderScorer for LexicalScorer {
    async fn score_all(&self, query: &str, texts: &[String]) -> Result<Vec<f32>, AppError> {
        let corpus: Vec<(String, String)> =
            texts.iter().enumerate().map(|(i, text)| (i.to_string(), text.clone())).collect();
        let index = Bm25Index::build(&corpus);
        let scores = index.score_all(query);
        let mut ordered = vec![0.0f32; texts.len()];
        for (id, score) in scores {
            if let Ok(i) = id.parse::<usize>() {
                ordered[i] = score;
            }
        }
        Ok(ordered)
    }
}

/// Tuning knobs for [`ReRanker`] that vary by deployment rather than by
/// call site. `cross_query_threshold` governs
/// [`rerank_across_queries`](ReRanker::rerank_across_queries): the source's
/// multi-query retriever unions raw results and filters by an aggregate
/// threshold that assumes a particular cross-encoder's score scale, so the
/// threshold is model-dependent and lives here rather than hard-coded in
/// the scoring function. Constructed from `AppConfig::cross_query_rerank_threshold`
/// at reranker construction time.
#[derive(Debug, Clone, Copy)]
pub struct RerankTuning {
    pub cross_query_threshold: f32,
}

impl Default for RerankTuning {
    fn default() -> Self {
        Self { cross_query_threshold: 0.8 }
    }
}

pub struct ReRanker {
    scorer: Arc<dyn CrossEncoderScorer>,
    tuning: RerankTuning,
}

impl ReRanker {
    pub fn new(scorer: Arc<dyn CrossEncoderScorer>, tuning: RerankTuning) -> Self {
        Self { scorer, tuning }
    }

    async fn score(&self, query: &str, docs: &[ScoredChunk]) -> Result<Vec<f32>, AppError> {
        let texts: Vec<String> = docs.iter().map(|d| d.chunk.text.clone()).collect();
        self.scorer.score_all(query, &texts).await
    }

    /// Scores every `(query, doc.text)` pair, attaches the score to
    /// `doc.metadata.extra["score"]`, sorts descending, and returns the
    /// top `top_k`. Stable on ties by original input order.
    pub async fn rerank(&self, query: &str, docs: Vec<ScoredChunk>, top_k: usize) -> Result<Vec<ScoredChunk>, AppError> {
        let scores = self.score(query, &docs).await?;
        let mut indexed: Vec<(usize, ScoredChunk, f32)> =
            docs.into_iter().zip(scores).enumerate().map(|(i, (chunk, score))| (i, chunk, score)).collect();
        indexed.sort_by(|(ia, _, sa), (ib, _, sb)| {
            sb.partial_cmp(sa).unwrap_or(Ordering::Equal).then_with(|| ia.cmp(ib))
        });
        indexed.truncate(top_k);
        Ok(indexed.into_iter().map(|(_, mut scored, score)| { attach_score(&mut scored, score); scored }).collect())
    }

    /// As [`rerank`](Self::rerank) but filters by `score >= threshold`
    /// instead of taking a fixed top-k.
    pub async fn rerank_with_threshold(
        &self,
        query: &str,
        docs: Vec<ScoredChunk>,
        threshold: f32,
    ) -> Result<Vec<ScoredChunk>, AppError> {
        let scores = self.score(query, &docs).await?;
        let mut scored: Vec<ScoredChunk> = docs
            .into_iter()
            .zip(scores)
            .filter(|(_, score)| *score >= threshold)
            .map(|(mut chunk, score)| { attach_score(&mut chunk, score); chunk })
            .collect();
        scored.sort_by(|a, b| score_of(b).partial_cmp(&score_of(a)).unwrap_or(Ordering::Equal));
        Ok(scored)
    }

    /// Scores every doc against every query; a doc's aggregate is the sum
    /// of its per-query scores. Filters by `aggregate >= self.tuning.cross_query_threshold`.
    /// Commutative in the order of `queries`, since the aggregate is a
    /// plain sum.
    pub async fn rerank_across_queries(
        &self,
        queries: &[String],
        docs: Vec<ScoredChunk>,
    ) -> Result<Vec<ScoredChunk>, AppError> {
        let mut totals = vec![0.0f32; docs.len()];
        for query in queries {
            let scores = self.score(query, &docs).await?;
            for (total, score) in totals.iter_mut().zip(scores) {
                *total += score;
            }
        }

        let threshold = self.tuning.cross_query_threshold;
        let mut scored: Vec<ScoredChunk> = docs
            .into_iter()
            .zip(totals)
            .filter(|(_, total)| *total >= threshold)
            .map(|(mut chunk, total)| { attach_score(&mut chunk, total); chunk })
            .collect();
        scored.sort_by(|a, b| score_of(b).partial_cmp(&score_of(a)).unwrap_or(Ordering::Equal));
        Ok(scored)
    }

    /// Lexical alternative to the cross-encoder: BM25 over the candidate
    /// set's own text, for when a lexical signal independent of the
    /// cross-encoder is wanted.
    pub fn bm25_rerank(query: &str, docs: Vec<ScoredChunk>, top_n: usize) -> Vec<ScoredChunk> {
        let corpus: Vec<(String, String)> = docs.iter().map(|d| (d.chunk.id.clone(), d.chunk.text.clone())).collect();
        let index = Bm25Index::build(&corpus);
        let scores: std::collections::HashMap<String, f32> = index.score_all(query).into_iter().collect();

        let mut scored: Vec<ScoredChunk> = docs
            .into_iter()
            .map(|mut chunk| {
                let score = *scores.get(&chunk.chunk.id).unwrap_or(&0.0);
                attach_score(&mut chunk, score);
                chunk
            })
            .collect();
        scored.sort_by(|a, b| score_of(b).partial_cmp(&score_of(a)).unwrap_or(Ordering::Equal));
        scored.truncate(top_n);
        scored
    }
}

fn attach_score(scored: &mut ScoredChunk, score: f32) {
    scored.chunk.metadata.extra.insert("score".to_string(), json!(score));
    scored.score = score;
}

fn score_of(scored: &ScoredChunk) -> f32 {
    scored.score
}
