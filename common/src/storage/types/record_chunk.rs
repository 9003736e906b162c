use crate::{
    error::AppError,
    storage::{db::SurrealDbClient, types::artifact::ArtifactType,
              types::record_chunk_embedding::RecordChunkEmbedding},
    stored_object,
};
use uuid::Uuid;

stored_object!(RecordChunk, "record_chunk", {
    artifact_id: String,
    patient_id: String,
    artifact_type: ArtifactType,
    chunk_text: String,
    char_start: usize,
    char_end: usize,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime", default)]
    occurred_at: DateTime<Utc>,
    author: Option<String>,
    source: String
});

/// Vector search hit including the hydrated chunk.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct ChunkSearchResult {
    pub chunk: RecordChunk,
    pub score: f32,
}

impl RecordChunk {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        artifact_id: String,
        patient_id: String,
        artifact_type: ArtifactType,
        chunk_text: String,
        char_start: usize,
        char_end: usize,
        occurred_at: DateTime<Utc>,
        author: Option<String>,
        source: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            artifact_id,
            patient_id,
            artifact_type,
            chunk_text,
            char_start,
            char_end,
            occurred_at,
            author,
            source,
        }
    }

    pub const fn char_offsets(&self) -> (usize, usize) {
        (self.char_start, self.char_end)
    }

    /// Atomically store a chunk and its embedding.
    ///
    /// Both records land in a single transaction so a crash cannot orphan
    /// an embedding or leave a chunk unsearchable. Chunks are write-once;
    /// there is no update path.
    pub async fn store_with_embedding(
        chunk: RecordChunk,
        embedding: Vec<f32>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let chunk_id = chunk.id.clone();
        let emb = RecordChunkEmbedding::new(&chunk, embedding);

        let response = db
            .client
            .query("BEGIN TRANSACTION;")
            .query(format!(
                "CREATE type::thing('{chunk_table}', $chunk_id) CONTENT $chunk;",
                chunk_table = Self::table_name(),
            ))
            .query(format!(
                "CREATE type::thing('{emb_table}', $emb_id) CONTENT $emb;",
                emb_table = RecordChunkEmbedding::table_name(),
            ))
            .query("COMMIT TRANSACTION;")
            .bind(("chunk_id", chunk_id))
            .bind(("chunk", chunk))
            .bind(("emb_id", emb.id.clone()))
            .bind(("emb", emb))
            .await?;

        response.check()?;

        Ok(())
    }

    pub async fn delete_by_artifact_id(
        artifact_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query("DELETE type::table($chunk_table) WHERE artifact_id = $artifact_id;
                    DELETE type::table($emb_table) WHERE artifact_id = $artifact_id;")
            .bind(("chunk_table", Self::table_name()))
            .bind(("emb_table", RecordChunkEmbedding::table_name()))
            .bind(("artifact_id", artifact_id.to_owned()))
            .await?
            .check()?;

        Ok(())
    }

    pub async fn count_for_patient(
        patient_id: &str,
        db: &SurrealDbClient,
    ) -> Result<usize, AppError> {
        #[derive(Deserialize)]
        struct Row {
            total: usize,
        }

        let mut response = db
            .query(
                "SELECT count() AS total FROM type::table($table) \
                 WHERE patient_id = $patient_id GROUP ALL",
            )
            .bind(("table", Self::table_name()))
            .bind(("patient_id", patient_id.to_owned()))
            .await?;

        let rows: Vec<Row> = response.take(0)?;
        Ok(rows.first().map_or(0, |r| r.total))
    }

    /// Loads the chunk population for a patient, optionally narrowed by
    /// artifact type and a closed `occurred_at` interval.
    pub async fn filtered(
        db: &SurrealDbClient,
        patient_id: &str,
        artifact_types: Option<&[ArtifactType]>,
        date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<RecordChunk>, AppError> {
        let mut sql = String::from(
            "SELECT * FROM type::table($table) WHERE patient_id = $patient_id",
        );
        if artifact_types.is_some() {
            sql.push_str(" AND artifact_type IN $artifact_types");
        }
        if date_range.is_some() {
            sql.push_str(" AND occurred_at >= $date_from AND occurred_at <= $date_to");
        }

        let types: Vec<String> = artifact_types
            .unwrap_or_default()
            .iter()
            .map(|t| t.as_str().to_owned())
            .collect();
        let (from, to) = date_range.unwrap_or((unfiltered_floor(), Utc::now()));

        let mut response = db
            .query(&sql)
            .bind(("table", Self::table_name()))
            .bind(("patient_id", patient_id.to_owned()))
            .bind(("artifact_types", types))
            .bind(("date_from", surrealdb::sql::Datetime::from(from)))
            .bind(("date_to", surrealdb::sql::Datetime::from(to)))
            .await?;

        Ok(response.take(0)?)
    }

    /// k-NN over the embedding table, constrained to the same metadata
    /// filters the rest of the pipeline applies. Scores are cosine
    /// similarities in [0, 1].
    pub async fn vector_search(
        take: usize,
        query_embedding: Vec<f32>,
        db: &SurrealDbClient,
        patient_id: &str,
        artifact_types: Option<&[ArtifactType]>,
        date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<ChunkSearchResult>, AppError> {
        #[derive(Deserialize)]
        struct Row {
            chunk_id: RecordChunk,
            score: f32,
        }

        let mut filter = String::from("patient_id = $patient_id");
        if artifact_types.is_some() {
            filter.push_str(" AND artifact_type IN $artifact_types");
        }
        if date_range.is_some() {
            filter.push_str(" AND occurred_at >= $date_from AND occurred_at <= $date_to");
        }

        let sql = format!(
            r#"
            SELECT
                chunk_id,
                vector::similarity::cosine(embedding, $embedding) AS score
            FROM {emb_table}
            WHERE {filter}
              AND embedding <|{take},100|> $embedding
            ORDER BY score DESC
            LIMIT {take}
            FETCH chunk_id;
            "#,
            emb_table = RecordChunkEmbedding::table_name(),
        );

        let types: Vec<String> = artifact_types
            .unwrap_or_default()
            .iter()
            .map(|t| t.as_str().to_owned())
            .collect();
        let (from, to) = date_range.unwrap_or((unfiltered_floor(), Utc::now()));

        let mut response = db
            .query(&sql)
            .bind(("embedding", query_embedding))
            .bind(("patient_id", patient_id.to_owned()))
            .bind(("artifact_types", types))
            .bind(("date_from", surrealdb::sql::Datetime::from(from)))
            .bind(("date_to", surrealdb::sql::Datetime::from(to)))
            .await
            .map_err(|e| AppError::InternalError(format!("Surreal query failed: {e}")))?;

        let rows: Vec<Row> = response.take::<Vec<Row>>(0).unwrap_or_default();

        Ok(rows
            .into_iter()
            .map(|r| ChunkSearchResult {
                chunk: r.chunk_id,
                score: r.score,
            })
            .collect())
    }
}

// Placeholder lower bound for unconstrained date filters; artifacts are
// validated to 1900-01-01 or later so this never excludes a row.
fn unfiltered_floor() -> DateTime<Utc> {
    #[allow(clippy::unwrap_used)]
    chrono::NaiveDate::from_ymd_opt(1800, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc()
}
