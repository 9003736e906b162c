use chrono::{DateTime, Utc};
use common::error::ErrorCode;
use generation_pipeline::{Extraction, UncertaintyLevel};
use serde::{Deserialize, Serialize};

/// Per-stage wall-clock entry returned in `metadata.stages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub total_time_ms: u64,
    pub stages: Vec<StageTiming>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One user-visible citation. `note_date` is relative ("2 days ago") for
/// display; the exact timestamp stays inside the extraction provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceEntry {
    pub artifact_id: String,
    pub chunk_id: String,
    pub snippet: String,
    pub note_date: String,
    pub source_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceSummary {
    pub score: f32,
    pub label: String,
    pub uncertainty: UncertaintyLevel,
    pub recommendation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    pub user_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// The single user-visible response object; the orchestrator is its sole
/// emitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiResponse {
    pub query_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detailed_summary: Option<String>,
    pub structured_extractions: Vec<Extraction>,
    pub provenance: Vec<ProvenanceEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<ConfidenceSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub metadata: ResponseMetadata,
}

/// Human wording for each stable error code.
pub fn user_message(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::InvalidQuery => "The question could not be processed. Please rephrase it.",
        ErrorCode::SessionExpired => {
            "This conversation has expired. Please start a new session."
        }
        ErrorCode::PatientNotFound => "No records were found for this patient.",
        ErrorCode::RateLimitExceeded => "Too many requests. Please wait a moment and retry.",
        ErrorCode::RetrievalEmpty => {
            "No supporting evidence was found in this patient's records."
        }
        ErrorCode::GenerationInvalidOutput | ErrorCode::GenerationProvenanceInvalid => {
            "The answer could not be verified against the records and was withheld."
        }
        ErrorCode::LlmTimeout | ErrorCode::PipelineTimeout => {
            "Query is taking longer than expected. Partial results may be shown."
        }
        ErrorCode::CircuitOpen => {
            "The answering service is temporarily unavailable. Retrieved records are shown."
        }
        ErrorCode::Internal => "An internal error occurred. Please try again.",
    }
}

/// Coarse relative rendering of a record date for display.
pub fn relative_date(occurred_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let days = (now - occurred_at).num_days();
    match days {
        i64::MIN..=-1 => "upcoming".to_owned(),
        0 => "today".to_owned(),
        1 => "yesterday".to_owned(),
        2..=13 => format!("{days} days ago"),
        14..=60 => format!("{} weeks ago", days / 7),
        61..=730 => format!("{} months ago", (days as f64 / 30.44).round().max(2.0) as i64),
        _ => format!("{} years ago", days / 365),
    }
}
