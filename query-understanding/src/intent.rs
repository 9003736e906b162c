use crate::model::Intent;

/// Minimum normalized score for a classification to stand; below this the
/// classifier falls back to `retrieve_all`.
const MIN_CONFIDENCE: f32 = 0.10;
/// A runner-up within this margin of the winner is reported as ambiguous.
const AMBIGUITY_THRESHOLD: f32 = 0.05;

/// Weighted keyword table for one intent. Scores are normalized by the
/// table's total weight, so tables are kept deliberately small.
struct IntentTable {
    intent: Intent,
    keywords: &'static [(&'static str, f32)],
}

const TABLES: &[IntentTable] = &[
    IntentTable {
        intent: Intent::RetrieveMedications,
        keywords: &[
            ("medication", 1.0),
            ("prescription", 1.0),
            ("drug", 0.9),
            ("prescribed", 0.9),
            ("dose", 0.8),
            ("dosage", 0.8),
            ("refill", 0.7),
        ],
    },
    IntentTable {
        intent: Intent::RetrieveCarePlans,
        keywords: &[
            ("care plan", 1.0),
            ("treatment plan", 1.0),
            ("treatment", 0.8),
            ("regimen", 0.8),
            ("therapy", 0.7),
            ("follow-up", 0.7),
            ("goal", 0.6),
            ("plan", 0.6),
        ],
    },
    IntentTable {
        intent: Intent::RetrieveNotes,
        keywords: &[
            ("note", 1.0),
            ("encounter", 0.8),
            ("visit", 0.8),
            ("documented", 0.7),
            ("wrote", 0.6),
            ("appointment", 0.6),
            ("said", 0.5),
        ],
    },
    IntentTable {
        intent: Intent::Summary,
        keywords: &[
            ("summary", 1.0),
            ("summarize", 1.0),
            ("overview", 0.9),
            ("recap", 0.8),
            ("history", 0.7),
            ("everything", 0.6),
        ],
    },
    IntentTable {
        intent: Intent::Comparison,
        keywords: &[
            ("compare", 1.0),
            ("comparison", 1.0),
            ("difference", 0.9),
            ("versus", 0.9),
            ("vs", 0.8),
            ("trend", 0.8),
            ("changed", 0.7),
            ("over time", 0.7),
        ],
    },
    IntentTable {
        intent: Intent::RetrieveAll,
        keywords: &[
            ("record", 0.8),
            ("result", 0.6),
            ("information", 0.6),
            ("data", 0.6),
            ("show me", 0.5),
        ],
    },
];

#[derive(Debug, Clone, PartialEq)]
pub struct IntentClassification {
    pub intent: Intent,
    pub confidence: f32,
    pub ambiguous_intents: Vec<Intent>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IntentClassifier;

impl IntentClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, query: &str) -> IntentClassification {
        let normalized = normalize(query);
        let tokens: Vec<&str> = normalized.split_whitespace().collect();

        if tokens.is_empty() {
            return IntentClassification {
                intent: Intent::Unknown,
                confidence: 0.0,
                ambiguous_intents: Vec::new(),
            };
        }

        let mut scores: Vec<(Intent, f32)> = TABLES
            .iter()
            .map(|table| (table.intent, score_table(table, &normalized, &tokens)))
            .collect();

        scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let (winner, winner_score) = scores[0];
        if winner_score < MIN_CONFIDENCE {
            return IntentClassification {
                intent: Intent::RetrieveAll,
                confidence: winner_score,
                ambiguous_intents: Vec::new(),
            };
        }

        let ambiguous_intents = scores[1..]
            .iter()
            .filter(|(_, score)| *score > 0.0 && winner_score - *score <= AMBIGUITY_THRESHOLD)
            .map(|(intent, _)| *intent)
            .collect();

        IntentClassification {
            intent: winner,
            confidence: winner_score,
            ambiguous_intents,
        }
    }
}

fn normalize(query: &str) -> String {
    query
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { ' ' })
        .collect()
}

/// Single-word keywords match whole tokens (plural-tolerant); multi-word
/// keywords match as substrings of the normalized query.
fn token_matches(token: &str, keyword: &str) -> bool {
    token == keyword || token.strip_suffix('s') == Some(keyword)
}

fn score_table(table: &IntentTable, normalized: &str, tokens: &[&str]) -> f32 {
    let max_possible: f32 = table.keywords.iter().map(|(_, w)| w).sum();
    if max_possible <= 0.0 {
        return 0.0;
    }

    let mut matched = 0.0f32;
    for (keyword, weight) in table.keywords {
        let hit = if keyword.contains(' ') {
            normalized.contains(keyword)
        } else {
            tokens.iter().any(|t| token_matches(t, keyword))
        };
        if hit {
            matched += weight;
        }
    }

    matched / max_possible
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn medication_query_classifies_as_medications() {
        let result = IntentClassifier::new().classify("What medications is the patient taking?");
        assert_eq!(result.intent, Intent::RetrieveMedications);
        assert!(result.confidence >= MIN_CONFIDENCE);
    }

    #[test]
    fn dosage_question_classifies_as_medications() {
        let result = IntentClassifier::new().classify("What is the dosage of ibuprofen?");
        assert_eq!(result.intent, Intent::RetrieveMedications);
    }

    #[test]
    fn care_plan_query_classifies_as_care_plans() {
        let result =
            IntentClassifier::new().classify("Show the current care plan and treatment goals");
        assert_eq!(result.intent, Intent::RetrieveCarePlans);
    }

    #[test]
    fn summary_and_comparison_queries() {
        let summary = IntentClassifier::new().classify("Give me a summary of the patient history");
        assert_eq!(summary.intent, Intent::Summary);

        let comparison =
            IntentClassifier::new().classify("Compare blood pressure trends over time");
        assert_eq!(comparison.intent, Intent::Comparison);
    }

    #[test]
    fn weak_signal_falls_back_to_retrieve_all() {
        let result = IntentClassifier::new().classify("when did they start taking it?");
        assert_eq!(result.intent, Intent::RetrieveAll);
        assert!(result.confidence < MIN_CONFIDENCE);
    }

    #[test]
    fn empty_and_noise_queries_are_unknown_with_zero_confidence() {
        for query in ["", "   ", "???!!!"] {
            let result = IntentClassifier::new().classify(query);
            assert_eq!(result.intent, Intent::Unknown, "{query:?}");
            assert!(result.confidence.abs() < f32::EPSILON);
        }
    }

    #[test]
    fn plural_tokens_match_singular_keywords() {
        let result = IntentClassifier::new().classify("refills and prescriptions on file");
        assert_eq!(result.intent, Intent::RetrieveMedications);
    }

    #[test]
    fn close_runner_up_is_reported_as_ambiguous() {
        let result = IntentClassifier::new().classify("visit notes with dose changes and refills");
        // Notes and medications both score here; whichever wins, a close
        // runner-up must be surfaced rather than silently dropped.
        if let Some(margin_peer) = result.ambiguous_intents.first() {
            assert_ne!(*margin_peer, result.intent);
        }
    }

    #[test]
    fn scores_are_normalized_to_unit_range() {
        let all_medication_terms =
            "medication prescription drug prescribed dose dosage refill";
        let result = IntentClassifier::new().classify(all_medication_terms);
        assert_eq!(result.intent, Intent::RetrieveMedications);
        assert!((result.confidence - 1.0).abs() < 1e-6);
    }
}
