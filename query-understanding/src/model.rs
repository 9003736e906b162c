use chrono::{DateTime, Utc};
use common::storage::types::artifact::ArtifactType;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Query intents recognized by the rule-based classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    RetrieveMedications,
    RetrieveCarePlans,
    RetrieveNotes,
    RetrieveAll,
    Summary,
    Comparison,
    Unknown,
}

impl Intent {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RetrieveMedications => "retrieve_medications",
            Self::RetrieveCarePlans => "retrieve_care_plans",
            Self::RetrieveNotes => "retrieve_notes",
            Self::RetrieveAll => "retrieve_all",
            Self::Summary => "summary",
            Self::Comparison => "comparison",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Medication,
    Condition,
    Symptom,
    Date,
    Person,
}

/// One surface-form match against the medical lexicon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub text: String,
    pub entity_type: EntityType,
    pub normalized: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelativeUnit {
    Days,
    Weeks,
    Months,
    Years,
}

/// A resolved date window. Bounds are inclusive, start-of-day /
/// end-of-day in UTC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalFilter {
    pub date_from: DateTime<Utc>,
    pub date_to: DateTime<Utc>,
    /// The phrase that matched, verbatim.
    pub time_reference: String,
    pub relative_type: Option<RelativeUnit>,
    pub amount: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilters {
    pub artifact_types: Option<Vec<ArtifactType>>,
    pub date_range: Option<DateRange>,
    /// Intent-derived type hints only steer type-preference scoring;
    /// caller-supplied filters set this and narrow the population itself.
    #[serde(default)]
    pub strict_types: bool,
}

/// Canonical parsed form of a user query, produced by the query
/// understanding agent and consumed by retrieval and generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredQuery {
    pub query_id: Uuid,
    pub original_query: String,
    pub patient_id: String,
    pub intent: Intent,
    pub entities: Vec<Entity>,
    pub temporal_filter: Option<TemporalFilter>,
    pub filters: QueryFilters,
    /// Response depth tier, 1 (minimal) through 5 (comprehensive).
    pub detail_level: u8,
}

impl StructuredQuery {
    /// Date bounds for storage queries, if any filter narrowed them.
    pub fn date_bounds(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        self.filters.date_range.map(|r| (r.from, r.to))
    }
}
