use std::collections::HashMap;

use common::error::AppError;
use query_understanding::StructuredQuery;
use retrieval_pipeline::{IntegratedRetrievalResult, RetrievalCandidate};
use tracing::{instrument, warn};

use crate::{
    extraction::Extraction,
    generator::{GenerationOutcome, TwoPassGenerator},
};

/// A generated answer whose every extraction has passed structural
/// provenance validation. Supporting-text mismatches are carried as
/// warnings, never errors.
#[derive(Debug, Clone)]
pub struct GeneratedAnswer {
    pub extractions: Vec<Extraction>,
    pub short_answer: String,
    pub detailed_summary: String,
    pub pass1_tokens: u32,
    pub pass2_tokens: u32,
    pub total_tokens: u32,
    pub execution_time_ms: u64,
    pub provenance_warnings: Vec<String>,
}

/// Orchestrates prompt building and two-pass generation, then enforces the
/// grounding contract: no extraction may cite an artifact or chunk outside
/// the retrieval set, and offsets must fall inside the cited chunk.
pub struct AnswerGenerationAgent {
    generator: TwoPassGenerator,
}

impl AnswerGenerationAgent {
    pub fn new(generator: TwoPassGenerator) -> Self {
        Self { generator }
    }

    #[instrument(skip_all, fields(query_id = %query.query_id))]
    pub async fn generate(
        &self,
        query: &StructuredQuery,
        retrieval: &IntegratedRetrievalResult,
    ) -> Result<GeneratedAnswer, AppError> {
        let outcome: GenerationOutcome =
            self.generator.generate(query, &retrieval.candidates).await?;

        let provenance_warnings =
            validate_extractions(&outcome.extractions, &retrieval.candidates)?;
        for warning in &provenance_warnings {
            warn!(%warning, "Provenance warning");
        }

        Ok(GeneratedAnswer {
            extractions: outcome.extractions,
            short_answer: outcome.short_answer,
            detailed_summary: outcome.detailed_summary,
            pass1_tokens: outcome.pass1_tokens,
            pass2_tokens: outcome.pass2_tokens,
            total_tokens: outcome.total_tokens,
            execution_time_ms: outcome.execution_time_ms,
            provenance_warnings,
        })
    }
}

/// Structural checks fail with `GENERATION_PROVENANCE_INVALID`; the
/// supporting-text containment check only produces warnings.
pub fn validate_extractions(
    extractions: &[Extraction],
    candidates: &[RetrievalCandidate],
) -> Result<Vec<String>, AppError> {
    let chunks_by_id: HashMap<&str, &RetrievalCandidate> = candidates
        .iter()
        .map(|candidate| (candidate.chunk.id.as_str(), candidate))
        .collect();

    let mut warnings = Vec::new();

    for (index, extraction) in extractions.iter().enumerate() {
        let provenance = extraction.provenance();

        let candidate = chunks_by_id.get(provenance.chunk_id.as_str()).ok_or_else(|| {
            AppError::GenerationProvenanceInvalid(format!(
                "extraction {index} cites unknown chunk '{}'",
                provenance.chunk_id
            ))
        })?;

        if candidate.chunk.artifact_id != provenance.artifact_id {
            return Err(AppError::GenerationProvenanceInvalid(format!(
                "extraction {index} cites artifact '{}' but chunk '{}' belongs to '{}'",
                provenance.artifact_id, provenance.chunk_id, candidate.chunk.artifact_id
            )));
        }

        let [start, end] = provenance.char_offsets;
        let chunk_len = candidate.chunk.chunk_text.chars().count();
        if start > end || end > chunk_len {
            return Err(AppError::GenerationProvenanceInvalid(format!(
                "extraction {index} offsets [{start}, {end}] fall outside chunk of length {chunk_len}"
            )));
        }

        let cited_slice: String = candidate
            .chunk
            .chunk_text
            .chars()
            .skip(start)
            .take(end - start)
            .collect();
        if !normalized_contains(&cited_slice, &provenance.supporting_text) {
            warnings.push(format!(
                "extraction {index}: supporting_text not found at offsets [{start}, {end}] of chunk '{}'",
                provenance.chunk_id
            ));
        }
    }

    Ok(warnings)
}

/// Whitespace-insensitive containment check.
fn normalized_contains(haystack: &str, needle: &str) -> bool {
    let normalize = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    normalize(haystack).contains(&normalize(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::{MedicationContent, Provenance};
    use chrono::Utc;
    use common::storage::types::{artifact::ArtifactType, record_chunk::RecordChunk};
    use retrieval_pipeline::SignalScores;

    const CHUNK_TEXT: &str =
        "Patient prescribed Metformin 500mg twice daily for Type 2 Diabetes management.";

    fn candidate(chunk_id: &str, artifact_id: &str) -> RetrievalCandidate {
        let mut chunk = RecordChunk::new(
            artifact_id.into(),
            "patient_1".into(),
            ArtifactType::ClinicalNote,
            CHUNK_TEXT.into(),
            0,
            CHUNK_TEXT.len(),
            Utc::now(),
            None,
            "https://emr.example.org/a/1".into(),
        );
        chunk.id = chunk_id.to_owned();
        RetrievalCandidate::new(chunk, SignalScores::default())
    }

    fn extraction(artifact_id: &str, chunk_id: &str, offsets: [usize; 2]) -> Extraction {
        Extraction::MedicationRecommendation {
            content: MedicationContent {
                medication: "Metformin".into(),
                dosage: Some("500mg".into()),
                frequency: Some("twice daily".into()),
            },
            provenance: Provenance {
                artifact_id: artifact_id.into(),
                chunk_id: chunk_id.into(),
                char_offsets: offsets,
                supporting_text: "Metformin 500mg twice daily".into(),
                confidence: Some(0.9),
            },
        }
    }

    #[test]
    fn valid_provenance_passes_without_warnings() {
        let candidates = vec![candidate("chunk_001", "artifact_1")];
        // "Metformin 500mg twice daily" spans chars 19..46.
        let extractions = vec![extraction("artifact_1", "chunk_001", [19, 46])];

        let warnings = validate_extractions(&extractions, &candidates).expect("valid");
        assert!(warnings.is_empty(), "warnings: {warnings:?}");
    }

    #[test]
    fn unknown_chunk_is_a_structural_failure() {
        let candidates = vec![candidate("chunk_001", "artifact_1")];
        let extractions = vec![extraction("artifact_1", "chunk_999", [0, 10])];

        let err = validate_extractions(&extractions, &candidates).expect_err("must fail");
        assert!(matches!(err, AppError::GenerationProvenanceInvalid(_)));
    }

    #[test]
    fn unknown_artifact_is_a_structural_failure() {
        let candidates = vec![candidate("chunk_001", "artifact_1")];
        let extractions = vec![extraction("note_999", "chunk_001", [19, 46])];

        let err = validate_extractions(&extractions, &candidates).expect_err("must fail");
        assert!(matches!(err, AppError::GenerationProvenanceInvalid(_)));
    }

    #[test]
    fn out_of_range_offsets_are_a_structural_failure() {
        let candidates = vec![candidate("chunk_001", "artifact_1")];

        let beyond_end = vec![extraction("artifact_1", "chunk_001", [0, 10_000])];
        assert!(matches!(
            validate_extractions(&beyond_end, &candidates),
            Err(AppError::GenerationProvenanceInvalid(_))
        ));

        let inverted = vec![extraction("artifact_1", "chunk_001", [30, 10])];
        assert!(matches!(
            validate_extractions(&inverted, &candidates),
            Err(AppError::GenerationProvenanceInvalid(_))
        ));
    }

    #[test]
    fn supporting_text_mismatch_is_only_a_warning() {
        let candidates = vec![candidate("chunk_001", "artifact_1")];
        // Offsets point at the start of the chunk, not the medication span.
        let extractions = vec![extraction("artifact_1", "chunk_001", [0, 18])];

        let warnings = validate_extractions(&extractions, &candidates).expect("still valid");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("supporting_text"));
    }

    #[test]
    fn whitespace_differences_do_not_warn() {
        let candidates = vec![candidate("chunk_001", "artifact_1")];
        let mut extractions = vec![extraction("artifact_1", "chunk_001", [19, 46])];
        if let Extraction::MedicationRecommendation { provenance, .. } = &mut extractions[0] {
            provenance.supporting_text = "Metformin  500mg\ntwice   daily".into();
        }

        let warnings = validate_extractions(&extractions, &candidates).expect("valid");
        assert!(warnings.is_empty());
    }

    #[test]
    fn empty_extraction_list_is_valid() {
        let warnings =
            validate_extractions(&[], &[candidate("chunk_001", "artifact_1")]).expect("valid");
        assert!(warnings.is_empty());
    }
}
