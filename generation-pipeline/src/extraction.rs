use serde::{Deserialize, Serialize};

/// The grounding tuple every factual claim must carry: which artifact and
/// chunk support it, where in the chunk, and the verbatim supporting text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub artifact_id: String,
    pub chunk_id: String,
    pub char_offsets: [usize; 2],
    pub supporting_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicationContent {
    pub medication: String,
    #[serde(default)]
    pub dosage: Option<String>,
    #[serde(default)]
    pub frequency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarePlanContent {
    pub plan: String,
    #[serde(default)]
    pub timeframe: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralNoteContent {
    pub note: String,
}

/// A single structured claim extracted from the candidate set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Extraction {
    MedicationRecommendation {
        content: MedicationContent,
        provenance: Provenance,
    },
    CarePlanNote {
        content: CarePlanContent,
        provenance: Provenance,
    },
    GeneralNote {
        content: GeneralNoteContent,
        provenance: Provenance,
    },
}

impl Extraction {
    pub const fn provenance(&self) -> &Provenance {
        match self {
            Self::MedicationRecommendation { provenance, .. }
            | Self::CarePlanNote { provenance, .. }
            | Self::GeneralNote { provenance, .. } => provenance,
        }
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MedicationRecommendation { .. } => "medication_recommendation",
            Self::CarePlanNote { .. } => "care_plan_note",
            Self::GeneralNote { .. } => "general_note",
        }
    }

    /// A one-line rendering of the claim for summaries and audit logs.
    pub fn summary_line(&self) -> String {
        match self {
            Self::MedicationRecommendation { content, .. } => {
                let mut line = content.medication.clone();
                if let Some(dosage) = &content.dosage {
                    line.push(' ');
                    line.push_str(dosage);
                }
                if let Some(frequency) = &content.frequency {
                    line.push(' ');
                    line.push_str(frequency);
                }
                line
            }
            Self::CarePlanNote { content, .. } => content.plan.clone(),
            Self::GeneralNote { content, .. } => content.note.clone(),
        }
    }
}
