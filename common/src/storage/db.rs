use std::ops::Deref;

use surrealdb::engine::any::{connect, Any};
use surrealdb::Surreal;

use crate::error::AppError;
use crate::storage::types::StoredObject;

/// Process-wide SurrealDB handle. Constructed once in the binary entrypoint
/// and cloned (cheap, the inner `Surreal<Any>` is itself reference-counted)
/// into every component that needs storage: the `DocumentStore`, both
/// `Cache` implementations, and the ingestion pipeline.
#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl SurrealDbClient {
    pub async fn new(address: &str, namespace: &str, database: &str) -> Result<Self, AppError> {
        let db = connect(address).await?;
        db.use_ns(namespace).use_db(database).await?;
        Ok(SurrealDbClient { client: db })
    }

    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, AppError> {
        let db = connect("mem://").await?;
        db.use_ns(namespace).use_db(database).await?;
        Ok(SurrealDbClient { client: db })
    }

    /// Stores a `StoredObject` under its own table/id. Used by the `cache`
    /// crate's `CacheEntry` types, which each live in one fixed table.
    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, AppError>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        Ok(self
            .client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await?)
    }

    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, AppError>
    where
        T: for<'de> StoredObject,
    {
        Ok(self.client.select((T::table_name(), id)).await?)
    }

    pub async fn get_all_stored_items<T>(&self) -> Result<Vec<T>, AppError>
    where
        T: for<'de> StoredObject,
    {
        Ok(self.client.select(T::table_name()).await?)
    }

    pub async fn delete_item<T>(&self, id: &str) -> Result<Option<T>, AppError>
    where
        T: for<'de> StoredObject,
    {
        Ok(self.client.delete((T::table_name(), id)).await?)
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}
