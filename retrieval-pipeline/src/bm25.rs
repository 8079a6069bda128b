//! Self-contained BM25 scoring (k1=1.5, b=0.75) over an in-memory corpus,
//! shared by `Retriever::ensemble` and the reranker's BM25 variant
//! (SPEC_FULL §4.4/§4.5). Built independently of SurrealDB's own FTS index
//! since both callers need to score a specific, already-fetched document
//! set rather than query the whole collection.

use std::collections::{HashMap, HashSet};

const K1: f32 = 1.5;
const B: f32 = 0.75;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is", "it",
    "its", "of", "on", "that", "the", "to", "was", "were", "will", "with", "this", "these", "those",
    "or", "but", "not", "do", "does", "did", "have", "had",
];

/// Lowercases, strips non-alphanumeric characters, and drops stopwords.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|word| word.chars().filter(|c| c.is_alphanumeric()).collect::<String>().to_lowercase())
        .filter(|word| !word.is_empty() && !STOPWORDS.contains(&word.as_str()))
        .collect()
}

/// BM25 index built once over a fixed corpus of `(id, text)` pairs.
pub struct Bm25Index {
    doc_tokens: Vec<(String, Vec<String>)>,
    doc_freq: HashMap<String, usize>,
    avg_doc_len: f32,
}

impl Bm25Index {
    pub fn build(corpus: &[(String, String)]) -> Self {
        let doc_tokens: Vec<(String, Vec<String>)> =
            corpus.iter().map(|(id, text)| (id.clone(), tokenize(text))).collect();

        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        for (_, tokens) in &doc_tokens {
            let unique: HashSet<&String> = tokens.iter().collect();
            for term in unique {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
        }

        let total_len: usize = doc_tokens.iter().map(|(_, tokens)| tokens.len()).sum();
        let avg_doc_len = if doc_tokens.is_empty() { 0.0 } else { total_len as f32 / doc_tokens.len() as f32 };

        Self { doc_tokens, doc_freq, avg_doc_len }
    }

    fn idf(&self, term: &str) -> f32 {
        let n = self.doc_tokens.len() as f32;
        let df = *self.doc_freq.get(term).unwrap_or(&0) as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// Scores every document in the corpus against `query`, returning
    /// `(id, score)` pairs in corpus order.
    pub fn score_all(&self, query: &str) -> Vec<(String, f32)> {
        let query_terms = tokenize(query);
        self.doc_tokens
            .iter()
            .map(|(id, tokens)| (id.clone(), self.score_doc(&query_terms, tokens)))
            .collect()
    }

    fn score_doc(&self, query_terms: &[String], doc_tokens: &[String]) -> f32 {
        if doc_tokens.is_empty() || self.avg_doc_len == 0.0 {
            return 0.0;
        }
        let doc_len = doc_tokens.len() as f32;
        let mut term_freq: HashMap<&str, usize> = HashMap::new();
        for token in doc_tokens {
            *term_freq.entry(token.as_str()).or_insert(0) += 1;
        }

        query_terms
            .iter()
            .map(|term| {
                let tf = *term_freq.get(term.as_str()).unwrap_or(&0) as f32;
                if tf == 0.0 {
                    return 0.0;
                }
                let idf = self.idf(term);
                idf * (tf * (K1 + 1.0)) / (tf + K1 * (1.0 - B + B * (doc_len / self.avg_doc_len)))
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_term_match_outscores_unrelated_document() {
        let corpus = vec![
            ("a".to_string(), "lisinopril dosing in elderly patients with renal impairment".to_string()),
            ("b".to_string(), "unrelated document about something else entirely".to_string()),
        ];
        let index = Bm25Index::build(&corpus);
        let scores = index.score_all("lisinopril renal");
        let a_score = scores.iter().find(|(id, _)| id == "a").unwrap().1;
        let b_score = scores.iter().find(|(id, _)| id == "b").unwrap().1;
        assert!(a_score > b_score);
    }

    #[test]
    fn tokenize_drops_punctuation_case_and_stopwords() {
        let tokens = tokenize("The Patient's Aspirin, 81mg.");
        assert_eq!(tokens, vec!["patients", "aspirin", "81mg"]);
    }
}
