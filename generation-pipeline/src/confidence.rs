use std::collections::HashMap;

use common::storage::types::artifact::ArtifactType;
use retrieval_pipeline::RetrievalCandidate;
use serde::{Deserialize, Serialize};

use crate::extraction::Extraction;

/// Uncertainty buckets over the aggregate confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UncertaintyLevel {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl UncertaintyLevel {
    pub fn from_aggregate(aggregate: f32) -> Self {
        if aggregate >= 0.90 {
            Self::VeryLow
        } else if aggregate >= 0.80 {
            Self::Low
        } else if aggregate >= 0.60 {
            Self::Medium
        } else if aggregate >= 0.40 {
            Self::High
        } else {
            Self::VeryHigh
        }
    }

    pub const fn recommendation(self) -> &'static str {
        match self {
            Self::VeryLow => "Finding is well supported by the record.",
            Self::Low => "Finding is supported; spot-check the cited source.",
            Self::Medium => "Verify the cited sources before acting on this finding.",
            Self::High => "Weakly supported; review the underlying records directly.",
            Self::VeryHigh => "Insufficient evidence; do not act without manual chart review.",
        }
    }

    /// The user-facing confidence label is the inverse of uncertainty.
    pub const fn confidence_label(self) -> &'static str {
        match self {
            Self::VeryLow | Self::Low => "high",
            Self::Medium => "medium",
            Self::High | Self::VeryHigh => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConfidenceFactors {
    pub retrieval: f32,
    pub source: f32,
    pub extraction: f32,
    pub consistency: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfidence {
    pub factors: ConfidenceFactors,
    pub aggregate: f32,
    pub level: UncertaintyLevel,
    pub low_confidence_reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceReport {
    pub per_extraction: Vec<ExtractionConfidence>,
    pub aggregate: f32,
    pub level: UncertaintyLevel,
    pub recommendation: String,
}

const RETRIEVAL_WEIGHT: f32 = 0.30;
const SOURCE_WEIGHT: f32 = 0.25;
const EXTRACTION_WEIGHT: f32 = 0.25;
const CONSISTENCY_WEIGHT: f32 = 0.20;

const DEFAULT_CONSISTENCY: f32 = 0.80;
const MISSING_CANDIDATE_RETRIEVAL: f32 = 0.50;
const LOW_FACTOR_THRESHOLD: f32 = 0.70;

/// Four-factor weighted confidence calibration per extraction.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceCalibrator {
    consistency: f32,
}

impl Default for ConfidenceCalibrator {
    fn default() -> Self {
        Self {
            consistency: DEFAULT_CONSISTENCY,
        }
    }
}

impl ConfidenceCalibrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Injects a cross-query consistency score when one is available.
    #[must_use]
    pub fn with_consistency(mut self, consistency: f32) -> Self {
        self.consistency = consistency.clamp(0.0, 1.0);
        self
    }

    pub fn score(
        &self,
        extractions: &[Extraction],
        candidates: &[RetrievalCandidate],
    ) -> ConfidenceReport {
        let by_chunk: HashMap<&str, &RetrievalCandidate> = candidates
            .iter()
            .map(|candidate| (candidate.chunk.id.as_str(), candidate))
            .collect();

        let per_extraction: Vec<ExtractionConfidence> = extractions
            .iter()
            .map(|extraction| self.score_one(extraction, &by_chunk))
            .collect();

        let aggregate = if per_extraction.is_empty() {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            {
                per_extraction.iter().map(|e| e.aggregate).sum::<f32>()
                    / per_extraction.len() as f32
            }
        };
        let level = UncertaintyLevel::from_aggregate(aggregate);

        ConfidenceReport {
            per_extraction,
            aggregate,
            level,
            recommendation: level.recommendation().to_owned(),
        }
    }

    fn score_one(
        &self,
        extraction: &Extraction,
        candidates_by_chunk: &HashMap<&str, &RetrievalCandidate>,
    ) -> ExtractionConfidence {
        let provenance = extraction.provenance();
        let source_candidate = candidates_by_chunk.get(provenance.chunk_id.as_str());

        let retrieval = source_candidate
            .map_or(MISSING_CANDIDATE_RETRIEVAL, |candidate| candidate.combined)
            .clamp(0.0, 1.0);
        let source = source_candidate.map_or(0.60, |candidate| {
            source_type_score(candidate.chunk.artifact_type)
        });
        let extraction_factor = extraction_score(provenance.confidence, &provenance.supporting_text);
        let consistency = self.consistency;

        let aggregate = RETRIEVAL_WEIGHT * retrieval
            + SOURCE_WEIGHT * source
            + EXTRACTION_WEIGHT * extraction_factor
            + CONSISTENCY_WEIGHT * consistency;

        let factors = ConfidenceFactors {
            retrieval,
            source,
            extraction: extraction_factor,
            consistency,
        };

        ExtractionConfidence {
            factors,
            aggregate,
            level: UncertaintyLevel::from_aggregate(aggregate),
            low_confidence_reasons: low_confidence_reasons(&factors),
        }
    }
}

/// Reliability of the artifact tier the claim came from.
pub fn source_type_score(artifact_type: ArtifactType) -> f32 {
    use ArtifactType as T;
    match artifact_type {
        T::ClinicalNote | T::ProgressNote | T::DischargeSummary => 1.00,
        T::Document => 0.95,
        T::MedicationOrder | T::Prescription | T::MedicationList => 0.90,
        T::Condition | T::Allergy => 0.90,
        T::LabResult | T::LabObservation => 0.85,
        T::CarePlan => 0.85,
        T::VitalSign => 0.80,
        T::FormResponse => 0.75,
        T::Message => 0.70,
        T::Appointment => 0.65,
        T::Referral => 0.60,
    }
}

/// Base 0.70, +0.15 when provenance is substantive, +0.10/+0.05 for the
/// extraction's own stated confidence.
fn extraction_score(stated_confidence: Option<f32>, supporting_text: &str) -> f32 {
    let mut score: f32 = 0.70;
    if !supporting_text.trim().is_empty() {
        score += 0.15;
    }
    match stated_confidence {
        Some(c) if c >= 0.9 => score += 0.10,
        Some(c) if c >= 0.8 => score += 0.05,
        _ => {}
    }
    score.clamp(0.0, 1.0)
}

fn low_confidence_reasons(factors: &ConfidenceFactors) -> Vec<String> {
    let mut reasons = Vec::new();
    if factors.retrieval < LOW_FACTOR_THRESHOLD {
        reasons.push(format!(
            "retrieval similarity is weak ({:.2})",
            factors.retrieval
        ));
    }
    if factors.source < LOW_FACTOR_THRESHOLD {
        reasons.push(format!(
            "source artifact tier is low-reliability ({:.2})",
            factors.source
        ));
    }
    if factors.extraction < LOW_FACTOR_THRESHOLD {
        reasons.push(format!(
            "extraction is weakly supported ({:.2})",
            factors.extraction
        ));
    }
    if factors.consistency < LOW_FACTOR_THRESHOLD {
        reasons.push(format!(
            "finding is inconsistent across queries ({:.2})",
            factors.consistency
        ));
    }
    reasons
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::{MedicationContent, Provenance};
    use chrono::Utc;
    use common::storage::types::record_chunk::RecordChunk;
    use retrieval_pipeline::SignalScores;

    fn candidate(chunk_id: &str, artifact_type: ArtifactType, combined: f32) -> RetrievalCandidate {
        let text = "Metformin 500mg twice daily.";
        let mut chunk = RecordChunk::new(
            "artifact_1".into(),
            "patient_1".into(),
            artifact_type,
            text.into(),
            0,
            text.len(),
            Utc::now(),
            None,
            "https://emr.example.org/a/1".into(),
        );
        chunk.id = chunk_id.to_owned();
        let mut c = RetrievalCandidate::new(chunk, SignalScores::default());
        c.combined = combined;
        c
    }

    fn extraction(chunk_id: &str, stated_confidence: Option<f32>) -> Extraction {
        Extraction::MedicationRecommendation {
            content: MedicationContent {
                medication: "Metformin".into(),
                dosage: Some("500mg".into()),
                frequency: Some("twice daily".into()),
            },
            provenance: Provenance {
                artifact_id: "artifact_1".into(),
                chunk_id: chunk_id.into(),
                char_offsets: [0, 15],
                supporting_text: "Metformin 500mg".into(),
                confidence: stated_confidence,
            },
        }
    }

    #[test]
    fn weights_sum_to_one() {
        let sum = RETRIEVAL_WEIGHT + SOURCE_WEIGHT + EXTRACTION_WEIGHT + CONSISTENCY_WEIGHT;
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn note_sourced_high_retrieval_extraction_lands_in_low_uncertainty() {
        let candidates = vec![candidate("chunk_001", ArtifactType::ClinicalNote, 0.95)];
        let extractions = vec![extraction("chunk_001", Some(0.92))];

        let report = ConfidenceCalibrator::new().score(&extractions, &candidates);
        assert!(matches!(
            report.level,
            UncertaintyLevel::Low | UncertaintyLevel::VeryLow
        ));
        assert_eq!(report.level.confidence_label(), "high");
        assert!(report.per_extraction[0].low_confidence_reasons.is_empty());
    }

    #[test]
    fn appointment_sourced_claim_scores_lower_than_note_sourced() {
        let note = ConfidenceCalibrator::new().score(
            &[extraction("chunk_001", Some(0.92))],
            &[candidate("chunk_001", ArtifactType::ClinicalNote, 0.9)],
        );
        let appointment = ConfidenceCalibrator::new().score(
            &[extraction("chunk_001", Some(0.92))],
            &[candidate("chunk_001", ArtifactType::Appointment, 0.9)],
        );

        assert!(note.aggregate > appointment.aggregate);
        assert!(appointment.per_extraction[0]
            .low_confidence_reasons
            .iter()
            .any(|r| r.contains("source artifact tier")));
    }

    #[test]
    fn aggregate_is_arithmetic_mean_across_extractions() {
        let candidates = vec![
            candidate("chunk_001", ArtifactType::ClinicalNote, 1.0),
            candidate("chunk_002", ArtifactType::Appointment, 0.2),
        ];
        let extractions = vec![
            extraction("chunk_001", Some(0.95)),
            extraction("chunk_002", None),
        ];

        let report = ConfidenceCalibrator::new().score(&extractions, &candidates);
        let mean = (report.per_extraction[0].aggregate + report.per_extraction[1].aggregate) / 2.0;
        assert!((report.aggregate - mean).abs() < 1e-6);
    }

    #[test]
    fn uncertainty_buckets_follow_thresholds() {
        assert_eq!(UncertaintyLevel::from_aggregate(0.95), UncertaintyLevel::VeryLow);
        assert_eq!(UncertaintyLevel::from_aggregate(0.85), UncertaintyLevel::Low);
        assert_eq!(UncertaintyLevel::from_aggregate(0.70), UncertaintyLevel::Medium);
        assert_eq!(UncertaintyLevel::from_aggregate(0.50), UncertaintyLevel::High);
        assert_eq!(UncertaintyLevel::from_aggregate(0.10), UncertaintyLevel::VeryHigh);
    }

    #[test]
    fn every_bucket_has_a_recommendation() {
        for level in [
            UncertaintyLevel::VeryLow,
            UncertaintyLevel::Low,
            UncertaintyLevel::Medium,
            UncertaintyLevel::High,
            UncertaintyLevel::VeryHigh,
        ] {
            assert!(!level.recommendation().is_empty());
        }
    }

    #[test]
    fn empty_extraction_list_is_maximally_uncertain() {
        let report = ConfidenceCalibrator::new().score(&[], &[]);
        assert!(report.aggregate.abs() < f32::EPSILON);
        assert_eq!(report.level, UncertaintyLevel::VeryHigh);
        assert_eq!(report.level.confidence_label(), "low");
    }

    #[test]
    fn stated_confidence_tiers_raise_the_extraction_factor() {
        let high = extraction_score(Some(0.95), "text");
        let mid = extraction_score(Some(0.85), "text");
        let none = extraction_score(None, "text");

        assert!((high - 0.95).abs() < 1e-6);
        assert!((mid - 0.90).abs() < 1e-6);
        assert!((none - 0.85).abs() < 1e-6);
    }
}
