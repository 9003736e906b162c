use query_understanding::{detail::ResponseGuidelines, StructuredQuery};
use retrieval_pipeline::RetrievalCandidate;

use crate::{extraction::Extraction, llm::ChatRequest};

pub const EXTRACTION_TEMPERATURE: f32 = 0.0;
pub const SUMMARIZATION_TEMPERATURE: f32 = 0.3;
const EXTRACTION_MAX_TOKENS: u32 = 2048;
const SUMMARIZATION_MAX_TOKENS: u32 = 768;
const AVG_CHARS_PER_TOKEN: usize = 4;

const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are a clinical records extraction engine.

Rules:
1. Answer ONLY from the numbered evidence blocks provided. Never use outside knowledge.
2. Every factual claim must cite its source as provenance: the artifact_id and chunk_id of the block it came from, char_offsets [start, end] into that chunk's text, and the verbatim supporting_text.
3. If the evidence does not support any claim, return an empty extraction list.

Respond with JSON only, no prose, conforming to:
{"extractions": [{"type": "medication_recommendation" | "care_plan_note" | "general_note", "content": {...}, "provenance": {"artifact_id": "...", "chunk_id": "...", "char_offsets": [0, 0], "supporting_text": "...", "confidence": 0.0}}]}

Content shapes:
- medication_recommendation: {"medication": "...", "dosage": "...", "frequency": "..."}
- care_plan_note: {"plan": "...", "timeframe": "..."}
- general_note: {"note": "..."}"#;

/// Builds the grounded prompts for both generation passes. The extraction
/// pass runs cold (temperature 0); summarization runs slightly warm.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptBuilder;

impl PromptBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn extraction_request(
        &self,
        query: &StructuredQuery,
        candidates: &[RetrievalCandidate],
    ) -> ChatRequest {
        let user = format!(
            "Patient question:\n{}\n\nEvidence blocks:\n{}",
            query.original_query,
            format_candidates(candidates)
        );

        ChatRequest {
            system: EXTRACTION_SYSTEM_PROMPT.to_owned(),
            user,
            temperature: EXTRACTION_TEMPERATURE,
            max_tokens: EXTRACTION_MAX_TOKENS,
        }
    }

    pub fn summarization_request(
        &self,
        query: &StructuredQuery,
        extractions: &[Extraction],
        guidelines: &ResponseGuidelines,
    ) -> ChatRequest {
        let reasoning_clause = if guidelines.require_reasoning {
            "Include brief clinical reasoning connecting the findings."
        } else {
            "State findings directly without added reasoning."
        };

        let system = format!(
            "You summarize structured clinical findings for a clinician.\n\
             Answer the question using ONLY the findings given.\n\
             The short answer must not exceed {max_words} words.\n\
             The detailed summary uses at most {bullets} bullet points.\n\
             {reasoning_clause}\n\
             Respond with JSON only: {{\"short_answer\": \"...\", \"detailed_summary\": \"...\"}}",
            max_words = guidelines.max_short_answer_words,
            bullets = guidelines.summary_bullets,
        );

        let findings = serde_json::to_string_pretty(extractions).unwrap_or_default();
        let user = format!(
            "Question:\n{}\n\nStructured findings:\n{}",
            query.original_query, findings
        );

        ChatRequest {
            system,
            user,
            temperature: SUMMARIZATION_TEMPERATURE,
            max_tokens: SUMMARIZATION_MAX_TOKENS,
        }
    }
}

/// Formats candidates as numbered blocks: a metadata header line, then the
/// chunk text. Ordinal indices let the model reference blocks precisely.
pub fn format_candidates(candidates: &[RetrievalCandidate]) -> String {
    if candidates.is_empty() {
        return "(no evidence retrieved)".to_owned();
    }

    let mut formatted = String::new();
    for (ordinal, candidate) in candidates.iter().enumerate() {
        let chunk = &candidate.chunk;
        formatted.push_str(&format!(
            "[{n}] artifact_id={artifact} chunk_id={chunk_id} type={artifact_type} date={date}{author}\n{text}\n\n",
            n = ordinal + 1,
            artifact = chunk.artifact_id,
            chunk_id = chunk.id,
            artifact_type = chunk.artifact_type,
            date = chunk.occurred_at.format("%Y-%m-%d"),
            author = chunk
                .author
                .as_deref()
                .map(|a| format!(" author={a}"))
                .unwrap_or_default(),
            text = chunk.chunk_text,
        ));
    }

    formatted
}

/// Rough chars/4 token estimator, matching the upstream providers closely
/// enough for budget checks.
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() / AVG_CHARS_PER_TOKEN).max(1)
}

/// Drops lowest-ranked candidates until the estimated prompt size fits the
/// token budget. Always keeps at least one candidate.
pub fn truncate_candidates(
    candidates: &[RetrievalCandidate],
    token_budget: usize,
) -> Vec<RetrievalCandidate> {
    let mut kept: Vec<RetrievalCandidate> = candidates.to_vec();

    while kept.len() > 1 && estimate_tokens(&format_candidates(&kept)) > token_budget {
        kept.pop();
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use common::storage::types::{artifact::ArtifactType, record_chunk::RecordChunk};
    use query_understanding::{detail, QueryUnderstanding};
    use retrieval_pipeline::SignalScores;

    fn structured(query: &str) -> StructuredQuery {
        let now = Utc.with_ymd_and_hms(2024, 10, 15, 9, 0, 0).single().expect("clock");
        QueryUnderstanding::new()
            .understand(query, "patient_1", now)
            .expect("structured query")
    }

    fn candidate(id: &str, text: &str) -> RetrievalCandidate {
        let mut chunk = RecordChunk::new(
            "artifact_1".into(),
            "patient_1".into(),
            ArtifactType::ClinicalNote,
            text.into(),
            0,
            text.len(),
            Utc::now(),
            Some("Dr. Osler".into()),
            "https://emr.example.org/a/1".into(),
        );
        chunk.id = id.to_owned();
        RetrievalCandidate::new(chunk, SignalScores::default())
    }

    #[test]
    fn extraction_request_is_cold_and_grounded() {
        let request = PromptBuilder::new().extraction_request(
            &structured("What medications is the patient taking?"),
            &[candidate("chunk_001", "Metformin 500mg twice daily.")],
        );

        assert!((request.temperature - 0.0).abs() < f32::EPSILON);
        assert!(request.system.contains("provenance"));
        assert!(request.user.contains("[1] artifact_id=artifact_1 chunk_id=chunk_001"));
        assert!(request.user.contains("Metformin 500mg twice daily."));
    }

    #[test]
    fn summarization_request_is_warm_and_carries_guidelines() {
        let guidelines = detail::guidelines(1);
        let request = PromptBuilder::new().summarization_request(
            &structured("Is the patient on metformin?"),
            &[],
            &guidelines,
        );

        assert!((request.temperature - 0.3).abs() < f32::EPSILON);
        assert!(request.system.contains("10 words"));
        assert!(request.max_tokens < EXTRACTION_MAX_TOKENS);
    }

    #[test]
    fn candidates_format_as_numbered_blocks() {
        let formatted = format_candidates(&[
            candidate("chunk_001", "First block."),
            candidate("chunk_002", "Second block."),
        ]);

        assert!(formatted.contains("[1] "));
        assert!(formatted.contains("[2] "));
        assert!(formatted.contains("author=Dr. Osler"));
        assert!(formatted.contains("type=clinical_note"));
    }

    #[test]
    fn truncation_drops_lowest_ranked_first_and_keeps_one() {
        let candidates = vec![
            candidate("chunk_001", &"a".repeat(400)),
            candidate("chunk_002", &"b".repeat(400)),
            candidate("chunk_003", &"c".repeat(400)),
        ];

        let kept = truncate_candidates(&candidates, 150);
        assert!(kept.len() < 3);
        assert_eq!(kept[0].chunk.id, "chunk_001");

        let minimal = truncate_candidates(&candidates, 1);
        assert_eq!(minimal.len(), 1);
        assert_eq!(minimal[0].chunk.id, "chunk_001");
    }

    #[test]
    fn token_estimate_tracks_character_count() {
        assert_eq!(estimate_tokens(&"x".repeat(400)), 100);
        assert_eq!(estimate_tokens(""), 1);
    }
}
