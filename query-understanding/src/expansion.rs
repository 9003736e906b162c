use crate::model::Entity;

/// Synonym table keyed by canonical term. Kept as data so the expansion
/// policy and the vocabulary evolve independently.
const SYNONYMS: &[(&str, &[&str])] = &[
    ("metformin", &["glucophage"]),
    ("ibuprofen", &["advil", "motrin"]),
    ("acetaminophen", &["tylenol", "paracetamol"]),
    ("atorvastatin", &["lipitor"]),
    ("lisinopril", &["zestril", "prinivil"]),
    ("warfarin", &["coumadin"]),
    ("omeprazole", &["prilosec"]),
    ("albuterol", &["ventolin", "salbutamol"]),
    ("amlodipine", &["norvasc"]),
    ("levothyroxine", &["synthroid"]),
    ("hypertension", &["high blood pressure", "htn"]),
    ("diabetes", &["diabetes mellitus", "dm"]),
    ("type 2 diabetes", &["t2dm", "adult-onset diabetes"]),
    ("myocardial infarction", &["heart attack", "mi"]),
    ("atrial fibrillation", &["afib"]),
    ("congestive heart failure", &["chf", "heart failure"]),
    ("chronic kidney disease", &["ckd", "renal disease"]),
    ("shortness of breath", &["sob", "dyspnea"]),
    ("chest pain", &["angina"]),
    ("medication", &["drug", "prescription"]),
];

const ORIGINAL_BOOST: f32 = 2.0;
const VARIANT_BOOST: f32 = 1.0;

/// One search string with its relative weight in downstream scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchVariant {
    pub text: String,
    pub boost: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct QueryExpander {
    max_synonyms_per_entity: usize,
}

impl Default for QueryExpander {
    fn default() -> Self {
        Self {
            max_synonyms_per_entity: 3,
        }
    }
}

impl QueryExpander {
    pub fn new(max_synonyms_per_entity: usize) -> Self {
        Self {
            max_synonyms_per_entity: max_synonyms_per_entity.max(1),
        }
    }

    pub fn synonyms(&self, term: &str) -> Vec<String> {
        let needle = term.to_ascii_lowercase();
        SYNONYMS
            .iter()
            .find(|(canonical, _)| *canonical == needle)
            .map(|(_, synonyms)| {
                synonyms
                    .iter()
                    .take(self.max_synonyms_per_entity)
                    .map(|s| (*s).to_owned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Ordered search variants: the original query first (boosted 2x),
    /// then one variant per entity synonym substitution.
    pub fn expand(&self, query: &str, entities: &[Entity]) -> Vec<SearchVariant> {
        let mut variants = vec![SearchVariant {
            text: query.to_owned(),
            boost: ORIGINAL_BOOST,
        }];

        for entity in entities {
            for synonym in self.synonyms(&entity.normalized) {
                let substituted = replace_ignore_case(query, &entity.text, &synonym);
                if substituted != query
                    && !variants.iter().any(|v| v.text == substituted)
                {
                    variants.push(SearchVariant {
                        text: substituted,
                        boost: VARIANT_BOOST,
                    });
                }
            }
        }

        variants
    }

    /// Flat term list for keyword search: query terms at variant boost plus
    /// entity surface forms and synonyms.
    pub fn expanded_search_terms(&self, query: &str, entities: &[Entity]) -> Vec<(String, f32)> {
        let mut terms: Vec<(String, f32)> = Vec::new();

        for token in query
            .to_ascii_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() >= 3)
        {
            push_unique(&mut terms, token.to_owned(), ORIGINAL_BOOST);
        }

        for entity in entities {
            push_unique(&mut terms, entity.normalized.to_ascii_lowercase(), ORIGINAL_BOOST);
            for synonym in self.synonyms(&entity.normalized) {
                push_unique(&mut terms, synonym.to_ascii_lowercase(), VARIANT_BOOST);
            }
        }

        terms
    }
}

fn push_unique(terms: &mut Vec<(String, f32)>, term: String, boost: f32) {
    if let Some(existing) = terms.iter_mut().find(|(t, _)| *t == term) {
        existing.1 = existing.1.max(boost);
    } else {
        terms.push((term, boost));
    }
}

/// Replaces the first case-insensitive occurrence of `needle`.
fn replace_ignore_case(haystack: &str, needle: &str, replacement: &str) -> String {
    if needle.is_empty() {
        return haystack.to_owned();
    }
    let lower_haystack = haystack.to_ascii_lowercase();
    let lower_needle = needle.to_ascii_lowercase();

    match lower_haystack.find(&lower_needle) {
        Some(pos) => {
            let mut result = String::with_capacity(haystack.len());
            result.push_str(&haystack[..pos]);
            result.push_str(replacement);
            result.push_str(&haystack[pos + needle.len()..]);
            result
        }
        None => haystack.to_owned(),
    }
}
