use chrono::{DateTime, Utc};
use common::{error::AppError, storage::types::artifact::ArtifactType};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    detail::DetailLevelAnalyzer,
    entities::EntityExtractor,
    intent::{IntentClassification, IntentClassifier},
    model::{DateRange, Intent, QueryFilters, StructuredQuery},
    temporal::TemporalParser,
};

const MAX_QUERY_CHARS: usize = 1000;

/// Composition layer over the five analyzers. No logic of its own beyond
/// input validation and the intent-to-artifact-type table.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryUnderstanding {
    temporal: TemporalParser,
    intent: IntentClassifier,
    entities: EntityExtractor,
    detail: DetailLevelAnalyzer,
}

impl QueryUnderstanding {
    pub fn new() -> Self {
        Self {
            temporal: TemporalParser::new(),
            intent: IntentClassifier::new(),
            entities: EntityExtractor::new(),
            detail: DetailLevelAnalyzer::new(),
        }
    }

    pub fn classify_intent(&self, query: &str) -> IntentClassification {
        self.intent.classify(query)
    }

    /// Parses a raw query into a `StructuredQuery`. The clock is injected
    /// so temporal resolution is reproducible.
    #[instrument(skip_all, fields(patient_id))]
    pub fn understand(
        &self,
        query: &str,
        patient_id: &str,
        now: DateTime<Utc>,
    ) -> Result<StructuredQuery, AppError> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(AppError::InvalidQuery("query must be non-empty".to_owned()));
        }
        if trimmed.chars().count() > MAX_QUERY_CHARS {
            return Err(AppError::InvalidQuery(format!(
                "query exceeds {MAX_QUERY_CHARS} characters"
            )));
        }
        if patient_id.trim().is_empty() {
            return Err(AppError::InvalidQuery(
                "patient_id must be non-empty".to_owned(),
            ));
        }

        let temporal_matches = self.temporal.parse_all(trimmed, now);
        let temporal_filter = temporal_matches.first().cloned();
        let classification = self.intent.classify(trimmed);
        let entities = self.entities.extract(trimmed, now);
        let detail_level =
            self.detail
                .analyze(trimmed, &entities, temporal_matches.len(), classification.intent);

        debug!(
            intent = %classification.intent,
            confidence = classification.confidence,
            entity_count = entities.len(),
            detail_level,
            has_temporal = temporal_filter.is_some(),
            "Structured query assembled"
        );

        let filters = QueryFilters {
            artifact_types: default_artifact_types(classification.intent),
            date_range: temporal_filter.as_ref().map(|t| DateRange {
                from: t.date_from,
                to: t.date_to,
            }),
            // Intent-derived type hints steer scoring, not filtering;
            // only caller-supplied type filters are strict.
            strict_types: false,
        };

        Ok(StructuredQuery {
            query_id: Uuid::new_v4(),
            original_query: trimmed.to_owned(),
            patient_id: patient_id.to_owned(),
            intent: classification.intent,
            entities,
            temporal_filter,
            filters,
            detail_level,
        })
    }
}

/// Default artifact-type hint per intent. Broad intents impose none.
pub fn default_artifact_types(intent: Intent) -> Option<Vec<ArtifactType>> {
    match intent {
        Intent::RetrieveMedications => Some(vec![
            ArtifactType::MedicationOrder,
            ArtifactType::Prescription,
            ArtifactType::MedicationList,
        ]),
        Intent::RetrieveCarePlans => Some(vec![ArtifactType::CarePlan]),
        Intent::RetrieveNotes => Some(vec![
            ArtifactType::ClinicalNote,
            ArtifactType::ProgressNote,
            ArtifactType::DischargeSummary,
        ]),
        Intent::RetrieveAll | Intent::Summary | Intent::Comparison | Intent::Unknown => None,
    }
}
