//! Retrieval strategies and cross-encoder re-ranking (SPEC_FULL §4.4/§4.5).

mod bm25;
pub mod reranker;
pub mod retriever;

pub use reranker::{CrossEncoderScorer, LexicalScorer, ReRanker, RerankTuning, RerankerPool};
pub use retriever::Retriever;
