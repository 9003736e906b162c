use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

use super::record_chunk::RecordChunk;

stored_object!(SentenceRecord, "sentence_record", {
    chunk_id: String,
    artifact_id: String,
    text: String,
    rel_start: usize,
    rel_end: usize,
    abs_start: usize,
    abs_end: usize
});

impl SentenceRecord {
    /// Builds a sentence record from chunk-relative offsets.
    ///
    /// Absolute offsets are derived, never supplied: they always equal the
    /// chunk's artifact offset plus the relative offset.
    pub fn from_chunk(chunk: &RecordChunk, text: String, rel_start: usize, rel_end: usize) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            chunk_id: chunk.id.clone(),
            artifact_id: chunk.artifact_id.clone(),
            text,
            rel_start,
            rel_end,
            abs_start: chunk.char_start + rel_start,
            abs_end: chunk.char_start + rel_end,
        }
    }

    pub async fn get_by_chunk_id(
        chunk_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<SentenceRecord>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM type::table($table) WHERE chunk_id = $chunk_id \
                 ORDER BY rel_start",
            )
            .bind(("table", Self::table_name()))
            .bind(("chunk_id", chunk_id.to_owned()))
            .await?;

        Ok(response.take(0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::artifact::ArtifactType;

    #[test]
    fn absolute_offsets_are_chunk_offset_plus_relative() {
        let chunk = RecordChunk::new(
            "a1".into(),
            "p1".into(),
            ArtifactType::ClinicalNote,
            "Second sentence here.".into(),
            120,
            141,
            Utc::now(),
            None,
            "https://emr.example.org/a/1".into(),
        );

        let sentence = SentenceRecord::from_chunk(&chunk, "Second sentence here.".into(), 0, 21);
        assert_eq!(sentence.abs_start, 120);
        assert_eq!(sentence.abs_end, 141);
        assert_eq!(sentence.abs_start, chunk.char_start + sentence.rel_start);
        assert_eq!(sentence.abs_end, chunk.char_start + sentence.rel_end);
    }
}
