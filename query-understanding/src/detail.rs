use serde::{Deserialize, Serialize};

use crate::model::{Entity, Intent};

pub const MINIMAL: u8 = 1;
pub const BASIC: u8 = 2;
pub const STANDARD: u8 = 3;
pub const DETAILED: u8 = 4;
pub const COMPREHENSIVE: u8 = 5;

/// Shaping rules the summarization pass follows for a given depth tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseGuidelines {
    pub max_short_answer_words: usize,
    pub summary_bullets: usize,
    pub min_sources: usize,
    pub require_reasoning: bool,
}

pub const fn guidelines(level: u8) -> ResponseGuidelines {
    match level {
        MINIMAL => ResponseGuidelines {
            max_short_answer_words: 10,
            summary_bullets: 1,
            min_sources: 1,
            require_reasoning: false,
        },
        BASIC => ResponseGuidelines {
            max_short_answer_words: 25,
            summary_bullets: 2,
            min_sources: 1,
            require_reasoning: false,
        },
        DETAILED => ResponseGuidelines {
            max_short_answer_words: 75,
            summary_bullets: 5,
            min_sources: 3,
            require_reasoning: true,
        },
        COMPREHENSIVE => ResponseGuidelines {
            max_short_answer_words: 100,
            summary_bullets: 7,
            min_sources: 3,
            require_reasoning: true,
        },
        _ => ResponseGuidelines {
            max_short_answer_words: 50,
            summary_bullets: 3,
            min_sources: 2,
            require_reasoning: false,
        },
    }
}

const YES_NO_STARTERS: &[&str] = &[
    "is ", "are ", "was ", "were ", "does ", "do ", "did ", "has ", "have ", "had ", "can ",
    "could ", "should ", "will ",
];

const WH_STARTERS: &[&str] = &["what ", "when ", "who ", "which ", "where ", "how much ", "how many "];

const DEEP_ANALYSIS_MARKERS: &[&str] = &["explain why", "analyze", "analysis", "comprehensive"];

const DETAILED_MARKERS: &[&str] = &["compare", "comparison", "trend", "trends", "over time", "versus"];

/// Rule-based mapping from query shape to a response depth tier 1-5.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetailLevelAnalyzer;

impl DetailLevelAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(
        &self,
        query: &str,
        entities: &[Entity],
        temporal_references: usize,
        intent: Intent,
    ) -> u8 {
        let lower = query.trim().to_ascii_lowercase();

        if DEEP_ANALYSIS_MARKERS.iter().any(|m| lower.contains(m)) {
            return COMPREHENSIVE;
        }

        let multi_entity = entities.len() >= 3;
        let multi_time = temporal_references >= 2;
        if DETAILED_MARKERS.iter().any(|m| lower.contains(m)) || multi_entity || multi_time {
            return DETAILED;
        }

        if YES_NO_STARTERS.iter().any(|s| lower.starts_with(s)) {
            return MINIMAL;
        }

        let word_count = lower.split_whitespace().count();
        if WH_STARTERS.iter().any(|s| lower.starts_with(s)) && word_count <= 8 {
            return BASIC;
        }

        // No structural signal: fall back to the intent's default depth.
        match intent {
            Intent::Summary | Intent::Comparison => DETAILED,
            Intent::Unknown => BASIC,
            _ => STANDARD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityType;

    fn entity(normalized: &str) -> Entity {
        Entity {
            text: normalized.to_owned(),
            entity_type: EntityType::Condition,
            normalized: normalized.to_owned(),
            confidence: 0.9,
        }
    }

    fn analyze(query: &str) -> u8 {
        DetailLevelAnalyzer::new().analyze(query, &[], 0, Intent::RetrieveAll)
    }

    #[test]
    fn yes_no_question_is_minimal() {
        assert_eq!(analyze("Is the patient taking metformin?"), MINIMAL);
        assert_eq!(analyze("Does the record show any allergies?"), MINIMAL);
    }

    #[test]
    fn short_wh_question_is_basic() {
        assert_eq!(analyze("What is the metformin dosage?"), BASIC);
        assert_eq!(analyze("When was the last visit?"), BASIC);
    }

    #[test]
    fn comparison_and_trends_are_detailed() {
        assert_eq!(analyze("Compare blood pressure readings"), DETAILED);
        assert_eq!(analyze("Show glucose trends this year"), DETAILED);
    }

    #[test]
    fn explain_why_is_comprehensive() {
        assert_eq!(analyze("Explain why the dosage was changed"), COMPREHENSIVE);
        assert_eq!(analyze("Provide a comprehensive medication review"), COMPREHENSIVE);
    }

    #[test]
    fn three_entities_force_detailed() {
        let entities = vec![entity("hypertension"), entity("diabetes"), entity("asthma")];
        let level =
            DetailLevelAnalyzer::new().analyze("conditions on file", &entities, 0, Intent::RetrieveAll);
        assert_eq!(level, DETAILED);
    }

    #[test]
    fn multiple_time_references_force_detailed() {
        let level = DetailLevelAnalyzer::new().analyze(
            "visits from last month and visits in June",
            &[],
            2,
            Intent::RetrieveNotes,
        );
        assert_eq!(level, DETAILED);
    }

    #[test]
    fn intent_table_breaks_ties() {
        let analyzer = DetailLevelAnalyzer::new();
        assert_eq!(
            analyzer.analyze("patient medication records", &[], 0, Intent::Summary),
            DETAILED
        );
        assert_eq!(
            analyzer.analyze("patient medication records", &[], 0, Intent::RetrieveMedications),
            STANDARD
        );
        assert_eq!(
            analyzer.analyze("gibberish text", &[], 0, Intent::Unknown),
            BASIC
        );
    }

    #[test]
    fn guidelines_scale_with_level() {
        let minimal = guidelines(MINIMAL);
        let comprehensive = guidelines(COMPREHENSIVE);
        assert!(minimal.max_short_answer_words < comprehensive.max_short_answer_words);
        assert!(!minimal.require_reasoning);
        assert!(comprehensive.require_reasoning);
        for level in 1..=5u8 {
            let g = guidelines(level);
            assert!(g.min_sources >= 1);
            assert!(g.summary_bullets >= 1);
        }
    }
}
