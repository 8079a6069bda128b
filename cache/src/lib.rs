//! Two interchangeable answer caches — exact-match and semantic — behind
//! one `Cache` contract (SPEC_FULL §4.6).

mod exact;
mod semantic;

pub use exact::ExactCache;
pub use semantic::SemanticCache;

use async_trait::async_trait;
use common::error::AppError;

/// Normalises a raw cache key the way both implementations key exact
/// matches: trim, then lowercase.
pub(crate) fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

#[async_trait]
pub trait Cache: Send + Sync {
    /// Returns the cached content for `(key, model_tag)`, or `None` on a
    /// miss (including an expired exact-match entry).
    async fn lookup(&self, key: &str, model_tag: &str) -> Result<Option<String>, AppError>;

    /// Records `content` under `(key, model_tag)`. `ttl_seconds` overrides
    /// the implementation's default where meaningful (exact-match only).
    async fn update(
        &self,
        key: &str,
        content: &str,
        model_tag: &str,
        ttl_seconds: Option<i64>,
    ) -> Result<(), AppError>;

    /// Removes every entry for `model_tag`.
    async fn clear(&self, model_tag: &str) -> Result<(), AppError>;
}
