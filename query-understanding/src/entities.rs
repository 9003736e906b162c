use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::{
    model::{Entity, EntityType},
    temporal::TemporalParser,
};

/// How a lexicon surface form relates to its canonical term. Ordering is
/// the specificity ladder: exact > stem > abbreviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchKind {
    Exact,
    Stem,
    Abbreviation,
}

struct LexiconEntry {
    surface: &'static str,
    canonical: &'static str,
    entity_type: EntityType,
    kind: MatchKind,
}

const fn exact(surface: &'static str, entity_type: EntityType) -> LexiconEntry {
    LexiconEntry {
        surface,
        canonical: surface,
        entity_type,
        kind: MatchKind::Exact,
    }
}

const fn brand(
    surface: &'static str,
    canonical: &'static str,
    entity_type: EntityType,
) -> LexiconEntry {
    LexiconEntry {
        surface,
        canonical,
        entity_type,
        kind: MatchKind::Stem,
    }
}

const fn abbrev(
    surface: &'static str,
    canonical: &'static str,
    entity_type: EntityType,
) -> LexiconEntry {
    LexiconEntry {
        surface,
        canonical,
        entity_type,
        kind: MatchKind::Abbreviation,
    }
}

/// Curated medical lexicon: generic names, brand names and common chart
/// abbreviations. Surface forms are matched case-insensitively on word
/// boundaries; canonical forms are what downstream filtering sees.
const LEXICON: &[LexiconEntry] = &[
    // Medications, generic names
    exact("metformin", EntityType::Medication),
    exact("insulin", EntityType::Medication),
    exact("lisinopril", EntityType::Medication),
    exact("amlodipine", EntityType::Medication),
    exact("atorvastatin", EntityType::Medication),
    exact("simvastatin", EntityType::Medication),
    exact("ibuprofen", EntityType::Medication),
    exact("acetaminophen", EntityType::Medication),
    exact("aspirin", EntityType::Medication),
    exact("warfarin", EntityType::Medication),
    exact("omeprazole", EntityType::Medication),
    exact("albuterol", EntityType::Medication),
    exact("amoxicillin", EntityType::Medication),
    exact("levothyroxine", EntityType::Medication),
    exact("gabapentin", EntityType::Medication),
    exact("prednisone", EntityType::Medication),
    // Medications, brand names
    brand("glucophage", "metformin", EntityType::Medication),
    brand("advil", "ibuprofen", EntityType::Medication),
    brand("motrin", "ibuprofen", EntityType::Medication),
    brand("tylenol", "acetaminophen", EntityType::Medication),
    brand("lipitor", "atorvastatin", EntityType::Medication),
    brand("zestril", "lisinopril", EntityType::Medication),
    brand("prinivil", "lisinopril", EntityType::Medication),
    brand("coumadin", "warfarin", EntityType::Medication),
    brand("prilosec", "omeprazole", EntityType::Medication),
    brand("ventolin", "albuterol", EntityType::Medication),
    brand("norvasc", "amlodipine", EntityType::Medication),
    brand("synthroid", "levothyroxine", EntityType::Medication),
    // Conditions
    exact("hypertension", EntityType::Condition),
    exact("diabetes", EntityType::Condition),
    exact("type 2 diabetes", EntityType::Condition),
    exact("type 1 diabetes", EntityType::Condition),
    exact("asthma", EntityType::Condition),
    exact("pneumonia", EntityType::Condition),
    exact("hyperlipidemia", EntityType::Condition),
    exact("hypothyroidism", EntityType::Condition),
    exact("myocardial infarction", EntityType::Condition),
    exact("atrial fibrillation", EntityType::Condition),
    exact("congestive heart failure", EntityType::Condition),
    exact("chronic kidney disease", EntityType::Condition),
    exact("depression", EntityType::Condition),
    exact("anxiety", EntityType::Condition),
    brand("heart attack", "myocardial infarction", EntityType::Condition),
    brand("high blood pressure", "hypertension", EntityType::Condition),
    abbrev("htn", "hypertension", EntityType::Condition),
    abbrev("dm", "diabetes", EntityType::Condition),
    abbrev("t2dm", "type 2 diabetes", EntityType::Condition),
    abbrev("mi", "myocardial infarction", EntityType::Condition),
    abbrev("afib", "atrial fibrillation", EntityType::Condition),
    abbrev("chf", "congestive heart failure", EntityType::Condition),
    abbrev("ckd", "chronic kidney disease", EntityType::Condition),
    abbrev("copd", "chronic obstructive pulmonary disease", EntityType::Condition),
    // Symptoms
    exact("headache", EntityType::Symptom),
    exact("nausea", EntityType::Symptom),
    exact("fatigue", EntityType::Symptom),
    exact("dizziness", EntityType::Symptom),
    exact("fever", EntityType::Symptom),
    exact("cough", EntityType::Symptom),
    exact("chest pain", EntityType::Symptom),
    exact("shortness of breath", EntityType::Symptom),
    exact("palpitations", EntityType::Symptom),
    exact("swelling", EntityType::Symptom),
    abbrev("sob", "shortness of breath", EntityType::Symptom),
];

static PERSON_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"\b(Dr|Doctor|Mr|Mrs|Ms)\.?\s+([A-Z][a-zA-Z\-]+)")
        .expect("person pattern literal is valid")
});

const EXACT_BASE: f32 = 0.95;
const STEM_BASE: f32 = 0.85;
const ABBREVIATION_BASE: f32 = 0.75;
/// Small per-character bonus keeps confidence monotone in match length
/// without crossing specificity tiers.
const LENGTH_BONUS_PER_CHAR: f32 = 0.002;
const CONFIDENCE_CEILING: f32 = 0.99;

#[derive(Debug, Clone, Copy, Default)]
pub struct EntityExtractor {
    temporal: TemporalParser,
}

impl EntityExtractor {
    pub fn new() -> Self {
        Self {
            temporal: TemporalParser::new(),
        }
    }

    /// Extracts medication/condition/symptom/person entities from the
    /// lexicon plus date entities via the temporal parser.
    pub fn extract(&self, query: &str, now: DateTime<Utc>) -> Vec<Entity> {
        let lower = query.to_ascii_lowercase();
        let mut entities: Vec<Entity> = Vec::new();

        for entry in LEXICON {
            if let Some(matched) = find_bounded(&lower, entry.surface) {
                entities.push(Entity {
                    text: matched,
                    entity_type: entry.entity_type,
                    normalized: entry.canonical.to_owned(),
                    confidence: confidence_for(entry),
                });
            }
        }

        for captures in PERSON_RE.captures_iter(query) {
            if let (Some(full), Some(name)) = (captures.get(0), captures.get(2)) {
                entities.push(Entity {
                    text: full.as_str().to_owned(),
                    entity_type: EntityType::Person,
                    normalized: name.as_str().to_owned(),
                    confidence: 0.90,
                });
            }
        }

        for filter in self.temporal.parse_all(query, now) {
            entities.push(Entity {
                text: filter.time_reference.clone(),
                entity_type: EntityType::Date,
                normalized: format!(
                    "{}/{}",
                    filter.date_from.date_naive(),
                    filter.date_to.date_naive()
                ),
                confidence: 0.95,
            });
        }

        dedupe(entities)
    }
}

/// Case-insensitive search constrained to word boundaries; also accepts a
/// trailing plural 's' on the surface form. Returns the matched slice.
fn find_bounded(haystack: &str, surface: &str) -> Option<String> {
    let bytes = haystack.as_bytes();
    let mut from = 0;

    while let Some(pos) = haystack[from..].find(surface) {
        let start = from + pos;
        let mut end = start + surface.len();

        let boundary_before = start == 0 || !bytes[start - 1].is_ascii_alphanumeric();
        // Swallow a plural suffix so "prescriptions" matches "prescription".
        if end < bytes.len() && bytes[end] == b's' {
            end += 1;
        }
        let boundary_after = end >= bytes.len() || !bytes[end].is_ascii_alphanumeric();

        if boundary_before && boundary_after {
            return Some(haystack[start..end].to_owned());
        }
        from = start + surface.len();
    }

    None
}

fn confidence_for(entry: &LexiconEntry) -> f32 {
    let base = match entry.kind {
        MatchKind::Exact => EXACT_BASE,
        MatchKind::Stem => STEM_BASE,
        MatchKind::Abbreviation => ABBREVIATION_BASE,
    };
    #[allow(clippy::cast_precision_loss)]
    let bonus = entry.surface.len() as f32 * LENGTH_BONUS_PER_CHAR;
    (base + bonus).min(CONFIDENCE_CEILING)
}

/// One entity per (normalized, type); the most confident match wins.
fn dedupe(entities: Vec<Entity>) -> Vec<Entity> {
    let mut kept: Vec<Entity> = Vec::with_capacity(entities.len());

    for entity in entities {
        if let Some(existing) = kept
            .iter_mut()
            .find(|e| e.normalized == entity.normalized && e.entity_type == entity.entity_type)
        {
            if entity.confidence > existing.confidence {
                *existing = entity;
            }
        } else {
            kept.push(entity);
        }
    }

    kept
}
