use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::AppError;

/// Process-wide configuration, validated eagerly at boot.
///
/// Field names track the spec's environment contract (`CHROMA_PATH`,
/// `COLLECTION_NAME_S`, `COLLECTION_NAME_U`, `REDIS_URL`) even though the
/// concrete backend behind all four is SurrealDB: they remain the logical
/// addresses the pipeline depends on, not literal Chroma/Redis handles.
#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    /// SurrealDB connection address. Env: `CHROMA_PATH`.
    pub chroma_path: String,
    /// Table/collection name backing the `Structured` collection.
    pub collection_name_s: String,
    /// Table/collection name backing the `Unstructured` collection.
    pub collection_name_u: String,
    /// Logical cache backend address. Env: `REDIS_URL`.
    pub redis_url: String,

    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_cross_encoder_model")]
    pub cross_encoder_model: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    #[serde(default = "default_exact_cache_ttl")]
    pub exact_cache_ttl_seconds: i64,
    #[serde(default = "default_semantic_threshold")]
    pub semantic_cache_threshold: f32,
    #[serde(default = "default_cross_query_threshold")]
    pub cross_query_rerank_threshold: f32,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_model() -> String {
    "NeuML/pubmedbert-base-embeddings".to_string()
}

fn default_cross_encoder_model() -> String {
    "ncbi/MedCPT-Cross-Encoder".to_string()
}

fn default_llm_model() -> String {
    "gpt-4".to_string()
}

fn default_exact_cache_ttl() -> i64 {
    3600
}

fn default_semantic_threshold() -> f32 {
    0.7
}

fn default_cross_query_threshold() -> f32 {
    0.8
}

/// Loads and validates `AppConfig` from an optional `config.toml` layered
/// under environment variables. Missing required fields are a fatal
/// `ConfigError`, matching the spec's "absence is fatal" contract for
/// `CHROMA_PATH`/`COLLECTION_NAME_S`/`COLLECTION_NAME_U`/`REDIS_URL`.
pub fn get_config() -> Result<AppConfig, AppError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize().map_err(AppError::from)
}
