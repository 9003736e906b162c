use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use surrealdb::RecordId;

use super::{artifact::ArtifactType, record_chunk::RecordChunk};

stored_object!(RecordChunkEmbedding, "record_chunk_embedding", {
    chunk_id: RecordId,
    artifact_id: String,
    patient_id: String,
    artifact_type: ArtifactType,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime", default)]
    occurred_at: DateTime<Utc>,
    embedding: Vec<f32>
});

impl RecordChunkEmbedding {
    /// Embedding rows duplicate the chunk's filter metadata so k-NN queries
    /// can constrain by patient, type and date without a join.
    pub fn new(chunk: &RecordChunk, embedding: Vec<f32>) -> Self {
        let now = Utc::now();
        Self {
            // Same id as the chunk to keep a 1:1 mapping.
            id: chunk.id.clone(),
            created_at: now,
            updated_at: now,
            chunk_id: RecordId::from_table_key(RecordChunk::table_name(), &chunk.id),
            artifact_id: chunk.artifact_id.clone(),
            patient_id: chunk.patient_id.clone(),
            artifact_type: chunk.artifact_type,
            occurred_at: chunk.occurred_at,
            embedding,
        }
    }

    pub async fn get_by_chunk_id(
        chunk_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<RecordChunkEmbedding>, AppError> {
        let rid = RecordId::from_table_key(RecordChunk::table_name(), chunk_id);

        let mut response = db
            .query("SELECT * FROM type::table($table) WHERE chunk_id = $chunk_id")
            .bind(("table", Self::table_name()))
            .bind(("chunk_id", rid))
            .await?;

        let rows: Vec<RecordChunkEmbedding> = response.take(0)?;
        Ok(rows.into_iter().next())
    }
}
