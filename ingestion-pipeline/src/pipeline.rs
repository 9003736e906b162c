use std::sync::Arc;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            artifact::{Artifact, ValidationReport},
            record_chunk::RecordChunk,
            sentence_record::SentenceRecord,
            StoredObject,
        },
    },
    utils::embedding::EmbeddingProvider,
};
use tracing::{info, instrument};

use crate::chunker::Chunker;

/// Outcome of one artifact ingestion.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub artifact_id: String,
    pub chunks_stored: usize,
    pub sentences_stored: usize,
    pub warnings: Vec<String>,
}

/// Validate → chunk → batch-embed → store. Ingestion starts from a
/// canonical `Artifact`; the upstream EMR client and normalizer live
/// elsewhere. Chunks and their embeddings are write-once.
pub struct IngestionPipeline {
    db: Arc<SurrealDbClient>,
    embedder: Arc<EmbeddingProvider>,
    chunker: Chunker,
}

impl IngestionPipeline {
    pub fn new(db: Arc<SurrealDbClient>, embedder: Arc<EmbeddingProvider>) -> Self {
        Self {
            db,
            embedder,
            chunker: Chunker::new(),
        }
    }

    #[instrument(skip_all, fields(artifact_id = %artifact.id, patient_id = %artifact.patient_id))]
    pub async fn ingest_artifact(&self, artifact: &Artifact) -> Result<IngestReport, AppError> {
        let validation: ValidationReport = artifact.validate();
        if !validation.valid {
            return Err(AppError::Validation(format!(
                "artifact '{}' failed validation: {}",
                artifact.id,
                validation.errors.join("; ")
            )));
        }

        self.db.store_item(artifact.clone()).await?;

        let drafts = self.chunker.chunk(&artifact.text);
        let chunk_texts: Vec<String> = drafts
            .iter()
            .map(|draft| artifact.text[draft.start..draft.end].to_owned())
            .collect();
        let embeddings = self.embedder.embed_batch(&chunk_texts).await?;

        let mut chunks_stored = 0usize;
        let mut sentences_stored = 0usize;

        for ((draft, chunk_text), embedding) in
            drafts.iter().zip(chunk_texts).zip(embeddings)
        {
            let chunk = RecordChunk::new(
                artifact.id.clone(),
                artifact.patient_id.clone(),
                artifact.artifact_type,
                chunk_text,
                draft.start,
                draft.end,
                artifact.occurred_at,
                artifact.author.clone(),
                artifact.source.clone(),
            );

            for (rel_start, rel_end) in &draft.sentences {
                let sentence_text = chunk.chunk_text[*rel_start..*rel_end].to_owned();
                let record =
                    SentenceRecord::from_chunk(&chunk, sentence_text, *rel_start, *rel_end);
                self.db.store_item(record).await?;
                sentences_stored += 1;
            }

            RecordChunk::store_with_embedding(chunk, embedding, &self.db).await?;
            chunks_stored += 1;
        }

        info!(
            chunks = chunks_stored,
            sentences = sentences_stored,
            warnings = validation.warnings.len(),
            "Artifact ingested"
        );

        Ok(IngestReport {
            artifact_id: artifact.id.clone(),
            chunks_stored,
            sentences_stored,
            warnings: validation.warnings,
        })
    }

    /// Removes an artifact and everything derived from it.
    pub async fn delete_artifact(&self, artifact_id: &str) -> Result<(), AppError> {
        RecordChunk::delete_by_artifact_id(artifact_id, &self.db).await?;
        self.db
            .query("DELETE type::table($table) WHERE artifact_id = $artifact_id")
            .bind(("table", SentenceRecord::table_name()))
            .bind(("artifact_id", artifact_id.to_owned()))
            .await?;
        self.db.delete_item::<Artifact>(artifact_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use common::storage::types::artifact::ArtifactType;
    use std::collections::HashMap;
    use uuid::Uuid;

    async fn setup() -> IngestionPipeline {
        let db = Arc::new(
            SurrealDbClient::memory("ingestion_test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("in-memory surrealdb"),
        );
        db.ensure_initialized(32).await.expect("indexes");
        let embedder = Arc::new(EmbeddingProvider::new_hashed(32).expect("provider"));
        IngestionPipeline::new(db, embedder)
    }

    fn artifact(text: &str) -> Artifact {
        Artifact::new(
            "patient_1".into(),
            ArtifactType::ClinicalNote,
            Utc::now() - Duration::days(3),
            text.into(),
            "https://emr.example.org/notes/77".into(),
            Some("Dr. Osler".into()),
            None,
            HashMap::new(),
        )
    }

    fn long_note() -> String {
        (0..120)
            .map(|i| {
                format!(
                    "Entry {i} records vitals medication adherence and symptom progression in detail today."
                )
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[tokio::test]
    async fn short_note_ingests_as_single_chunk_with_sentences() {
        let pipeline = setup().await;
        let note = artifact("Patient is stable on metformin. Blood pressure within range.");

        let report = pipeline.ingest_artifact(&note).await.expect("ingest");

        assert_eq!(report.chunks_stored, 1);
        assert_eq!(report.sentences_stored, 2);

        let chunks = RecordChunk::filtered(&pipeline.db, "patient_1", None, None)
            .await
            .expect("chunks");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].artifact_id, note.id);
        assert_eq!(chunks[0].author.as_deref(), Some("Dr. Osler"));

        let sentences = SentenceRecord::get_by_chunk_id(&chunks[0].id, &pipeline.db)
            .await
            .expect("sentences");
        assert_eq!(sentences.len(), 2);
        for sentence in &sentences {
            assert_eq!(sentence.abs_start, chunks[0].char_start + sentence.rel_start);
            assert_eq!(sentence.abs_end, chunks[0].char_start + sentence.rel_end);
        }
    }

    #[tokio::test]
    async fn long_note_chunks_with_verifiable_offsets() {
        let pipeline = setup().await;
        let text = long_note();
        let note = artifact(&text);

        let report = pipeline.ingest_artifact(&note).await.expect("ingest");
        assert!(report.chunks_stored > 1);

        let chunks = RecordChunk::filtered(&pipeline.db, "patient_1", None, None)
            .await
            .expect("chunks");
        for chunk in &chunks {
            let reslice = &text[chunk.char_start..chunk.char_end];
            assert_eq!(
                reslice.split_whitespace().collect::<Vec<_>>(),
                chunk.chunk_text.split_whitespace().collect::<Vec<_>>(),
                "chunk text must round-trip through source offsets"
            );
        }
    }

    #[tokio::test]
    async fn invalid_artifact_is_rejected_before_any_write() {
        let pipeline = setup().await;
        let mut bad = artifact("some text");
        bad.text = String::new();

        let err = pipeline.ingest_artifact(&bad).await.expect_err("must fail");
        assert!(matches!(err, AppError::Validation(_)));

        let chunks = RecordChunk::filtered(&pipeline.db, "patient_1", None, None)
            .await
            .expect("chunks");
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn future_dated_artifact_ingests_with_warning() {
        let pipeline = setup().await;
        let mut note = artifact("Scheduled infusion for next month. Dosage reviewed.");
        note.occurred_at = Utc::now() + Duration::days(14);

        let report = pipeline.ingest_artifact(&note).await.expect("ingest");
        assert!(report.warnings.iter().any(|w| w.contains("future")));
        assert_eq!(report.chunks_stored, 1);
    }

    #[tokio::test]
    async fn delete_artifact_removes_chunks_and_sentences() {
        let pipeline = setup().await;
        let note = artifact("Patient is stable on metformin. Blood pressure within range.");
        pipeline.ingest_artifact(&note).await.expect("ingest");

        pipeline.delete_artifact(&note.id).await.expect("delete");

        let chunks = RecordChunk::filtered(&pipeline.db, "patient_1", None, None)
            .await
            .expect("chunks");
        assert!(chunks.is_empty());
    }
}
