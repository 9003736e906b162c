use std::collections::HashMap;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use chrono::NaiveDate;
use url::Url;

/// The seventeen recognized artifact tiers of the canonical EMR record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    ClinicalNote,
    ProgressNote,
    DischargeSummary,
    Document,
    MedicationOrder,
    Prescription,
    MedicationList,
    Condition,
    Allergy,
    LabResult,
    LabObservation,
    VitalSign,
    CarePlan,
    FormResponse,
    Message,
    Appointment,
    Referral,
}

impl ArtifactType {
    pub const ALL: [ArtifactType; 17] = [
        Self::ClinicalNote,
        Self::ProgressNote,
        Self::DischargeSummary,
        Self::Document,
        Self::MedicationOrder,
        Self::Prescription,
        Self::MedicationList,
        Self::Condition,
        Self::Allergy,
        Self::LabResult,
        Self::LabObservation,
        Self::VitalSign,
        Self::CarePlan,
        Self::FormResponse,
        Self::Message,
        Self::Appointment,
        Self::Referral,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClinicalNote => "clinical_note",
            Self::ProgressNote => "progress_note",
            Self::DischargeSummary => "discharge_summary",
            Self::Document => "document",
            Self::MedicationOrder => "medication_order",
            Self::Prescription => "prescription",
            Self::MedicationList => "medication_list",
            Self::Condition => "condition",
            Self::Allergy => "allergy",
            Self::LabResult => "lab_result",
            Self::LabObservation => "lab_observation",
            Self::VitalSign => "vital_sign",
            Self::CarePlan => "care_plan",
            Self::FormResponse => "form_response",
            Self::Message => "message",
            Self::Appointment => "appointment",
            Self::Referral => "referral",
        }
    }
}

impl std::str::FromStr for ArtifactType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == value.to_ascii_lowercase())
            .ok_or_else(|| format!("unrecognized artifact type '{value}'"))
    }
}

impl std::fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

stored_object!(Artifact, "artifact", {
    patient_id: String,
    #[serde(rename = "type")]
    artifact_type: ArtifactType,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime", default)]
    occurred_at: DateTime<Utc>,
    text: String,
    source: String,
    author: Option<String>,
    title: Option<String>,
    #[serde(default)]
    meta: HashMap<String, String>
});

/// Per-artifact validation outcome; warnings never make an artifact invalid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationReport {
    pub artifact_id: String,
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchValidationSummary {
    pub valid: usize,
    pub invalid: usize,
    pub with_warnings: usize,
    pub reports: Vec<ValidationReport>,
}

const TEXT_SHORT_WARNING: usize = 10;
const TEXT_LONG_WARNING: usize = 50_000;

impl Artifact {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        patient_id: String,
        artifact_type: ArtifactType,
        occurred_at: DateTime<Utc>,
        text: String,
        source: String,
        author: Option<String>,
        title: Option<String>,
        meta: HashMap<String, String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            patient_id,
            artifact_type,
            occurred_at,
            text,
            source,
            author,
            title,
            meta,
        }
    }

    /// Canonical checks on a normalized artifact before ingestion.
    ///
    /// Errors: missing required fields, empty text, `occurred_at` before
    /// 1900-01-01. Warnings: future `occurred_at`, suspicious text length,
    /// non-URL source.
    pub fn validate(&self) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if self.id.trim().is_empty() {
            errors.push("id must be non-empty".to_owned());
        }
        if self.patient_id.trim().is_empty() {
            errors.push("patient_id must be non-empty".to_owned());
        }
        if self.text.trim().is_empty() {
            errors.push("text must be non-empty".to_owned());
        }
        if self.source.trim().is_empty() {
            errors.push("source must be non-empty".to_owned());
        }

        #[allow(clippy::unwrap_used)]
        let floor = NaiveDate::from_ymd_opt(1900, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc();
        if self.occurred_at < floor {
            errors.push(format!(
                "occurred_at {} predates 1900-01-01",
                self.occurred_at.to_rfc3339()
            ));
        } else if self.occurred_at > Utc::now() {
            warnings.push(format!(
                "occurred_at {} is in the future",
                self.occurred_at.to_rfc3339()
            ));
        }

        let text_len = self.text.chars().count();
        if text_len > 0 && text_len < TEXT_SHORT_WARNING {
            warnings.push(format!("text is unusually short ({text_len} chars)"));
        }
        if text_len > TEXT_LONG_WARNING {
            warnings.push(format!("text is unusually long ({text_len} chars)"));
        }

        if !self.source.trim().is_empty() && Url::parse(&self.source).is_err() {
            warnings.push(format!("source '{}' is not a URL", self.source));
        }

        ValidationReport {
            artifact_id: self.id.clone(),
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    pub fn validate_batch(artifacts: &[Artifact]) -> BatchValidationSummary {
        let reports: Vec<ValidationReport> = artifacts.iter().map(Artifact::validate).collect();
        let valid = reports.iter().filter(|r| r.valid).count();
        let with_warnings = reports.iter().filter(|r| !r.warnings.is_empty()).count();

        BatchValidationSummary {
            valid,
            invalid: reports.len() - valid,
            with_warnings,
            reports,
        }
    }

    pub async fn get_for_patient(
        patient_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Artifact>, AppError> {
        let mut response = db
            .query("SELECT * FROM type::table($table) WHERE patient_id = $patient_id")
            .bind(("table", Self::table_name()))
            .bind(("patient_id", patient_id.to_owned()))
            .await?;

        Ok(response.take(0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_artifact() -> Artifact {
        Artifact::new(
            "patient_1".into(),
            ArtifactType::ClinicalNote,
            Utc::now() - Duration::days(2),
            "Patient prescribed Metformin 500mg twice daily for Type 2 Diabetes management."
                .into(),
            "https://emr.example.org/notes/1".into(),
            Some("Dr. Osler".into()),
            Some("Follow-up note".into()),
            HashMap::new(),
        )
    }

    #[test]
    fn valid_artifact_passes() {
        let report = sample_artifact().validate();
        assert!(report.valid, "errors: {:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn empty_text_is_an_error() {
        let mut artifact = sample_artifact();
        artifact.text = String::new();
        let report = artifact.validate();
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("text")));
    }

    #[test]
    fn pre_1900_date_is_an_error_future_is_a_warning() {
        let mut artifact = sample_artifact();
        artifact.occurred_at = NaiveDate::from_ymd_opt(1899, 12, 31)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            .and_utc();
        assert!(!artifact.validate().valid);

        let mut future = sample_artifact();
        future.occurred_at = Utc::now() + Duration::days(30);
        let report = future.validate();
        assert!(report.valid);
        assert!(report.warnings.iter().any(|w| w.contains("future")));
    }

    #[test]
    fn short_text_and_bad_source_warn() {
        let mut artifact = sample_artifact();
        artifact.text = "BP 120/80".into();
        artifact.source = "not-a-url".into();
        let report = artifact.validate();
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn batch_counts_are_consistent() {
        let good = sample_artifact();
        let mut invalid = sample_artifact();
        invalid.text = String::new();
        let mut warned = sample_artifact();
        warned.source = "plain text".into();

        let summary = Artifact::validate_batch(&[good, invalid, warned]);
        assert_eq!(summary.valid, 2);
        assert_eq!(summary.invalid, 1);
        assert_eq!(summary.with_warnings, 1);
        assert_eq!(summary.reports.len(), 3);
    }

    #[test]
    fn artifact_type_round_trips_through_str() {
        for tier in ArtifactType::ALL {
            let parsed: ArtifactType = tier.as_str().parse().expect("parse tier");
            assert_eq!(parsed, tier);
        }
        assert!("imaging_study".parse::<ArtifactType>().is_err());
    }
}
