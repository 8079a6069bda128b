use async_openai::error::OpenAIError;
use thiserror::Error;

/// Taxonomy of errors crossing the pipeline's internal boundaries.
///
/// Only `Config` is allowed to propagate out of the pipeline; every other
/// variant is caught at its originating stage, logged, and converted into a
/// neutral value (an empty list, a sentinel string) before the pipeline
/// decides whether to surface or mask it to the user.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("input error: {0}")]
    Input(String),
    #[error("guard rejection: {0:?}")]
    GuardRejection(Vec<String>),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("internal service error: {0}")]
    Internal(String),
}

impl From<surrealdb::Error> for AppError {
    fn from(err: surrealdb::Error) -> Self {
        AppError::Backend(format!("surrealdb: {err}"))
    }
}

impl From<OpenAIError> for AppError {
    fn from(err: OpenAIError) -> Self {
        AppError::Backend(format!("llm provider: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Backend(format!("json: {err}"))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Backend(format!("io: {err}"))
    }
}
