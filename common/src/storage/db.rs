use crate::error::AppError;

use super::types::StoredObject;
use std::ops::Deref;
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};

/// Thin wrapper around the SurrealDB connection used across the workspace.
///
/// Chunk metadata, embeddings and evaluations live here; per-request data
/// flows by value through the pipelines and never touches the database.
#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

impl SurrealDbClient {
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        db.signin(Root { username, password }).await?;
        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// In-memory instance for tests; requires the `kv-mem` engine.
    #[cfg(any(test, feature = "test-utils"))]
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;
        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// Defines the indexes the retrieval pipeline depends on.
    ///
    /// Must run before any chunk is stored; the HNSW index dimension has to
    /// match the configured embedding dimension.
    pub async fn ensure_initialized(&self, embedding_dimensions: usize) -> Result<(), AppError> {
        self.client
            .query(format!(
                "DEFINE INDEX OVERWRITE idx_embedding_record_chunk ON TABLE record_chunk_embedding \
                 FIELDS embedding HNSW DIMENSION {embedding_dimensions};"
            ))
            .await?
            .check()?;

        self.client
            .query(
                "DEFINE INDEX IF NOT EXISTS idx_chunk_patient ON TABLE record_chunk FIELDS patient_id;
                 DEFINE INDEX IF NOT EXISTS idx_chunk_artifact ON TABLE record_chunk FIELDS artifact_id;
                 DEFINE INDEX IF NOT EXISTS idx_chunk_occurred ON TABLE record_chunk FIELDS occurred_at;
                 DEFINE INDEX IF NOT EXISTS idx_artifact_patient ON TABLE artifact FIELDS patient_id;
                 DEFINE INDEX IF NOT EXISTS idx_evaluation_query ON TABLE evaluation FIELDS query_id;",
            )
            .await?
            .check()?;

        Ok(())
    }

    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client.select((T::table_name(), id)).await
    }

    pub async fn get_all_stored_items<T>(&self) -> Result<Vec<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client.select(T::table_name()).await
    }

    pub async fn delete_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client.delete((T::table_name(), id)).await
    }
}
