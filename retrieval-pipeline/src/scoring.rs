use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use common::storage::types::artifact::ArtifactType;
use query_understanding::Intent;
use serde::{Deserialize, Serialize};

use crate::RetrievalCandidate;

/// The four normalized retrieval signals gathered per candidate.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct SignalScores {
    pub semantic: f32,
    pub keyword: f32,
    pub recency: f32,
    pub type_preference: f32,
}

/// Linear fusion weights. Must sum to 1; `normalized` renormalizes partial
/// caller-supplied weights.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScoreWeights {
    pub semantic: f32,
    pub keyword: f32,
    pub recency: f32,
    pub type_preference: f32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            semantic: 0.40,
            keyword: 0.30,
            recency: 0.20,
            type_preference: 0.10,
        }
    }
}

impl ScoreWeights {
    pub fn sum(&self) -> f32 {
        self.semantic + self.keyword + self.recency + self.type_preference
    }

    /// Scales the weight vector so it sums to 1. A degenerate all-zero
    /// vector falls back to the defaults.
    pub fn normalized(&self) -> Self {
        let sum = self.sum();
        if sum <= f32::EPSILON {
            return Self::default();
        }
        Self {
            semantic: self.semantic / sum,
            keyword: self.keyword / sum,
            recency: self.recency / sum,
            type_preference: self.type_preference / sum,
        }
    }

    pub fn combine(&self, scores: &SignalScores) -> f32 {
        let weights = self.normalized();
        clamp_unit(
            scores.semantic * weights.semantic
                + scores.keyword * weights.keyword
                + scores.recency * weights.recency
                + scores.type_preference * weights.type_preference,
        )
    }
}

pub const fn clamp_unit(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

/// Exponential time decay with a roughly 100-day half-life. Future dates
/// clamp to zero days ago.
const RECENCY_LAMBDA: f64 = 0.01;

pub fn recency_score(occurred_at: DateTime<Utc>, now: DateTime<Utc>) -> f32 {
    let days_ago = (now - occurred_at).num_days().max(0);
    #[allow(clippy::cast_precision_loss)]
    let score = (-RECENCY_LAMBDA * days_ago as f64).exp();
    clamp_unit(score as f32)
}

/// Intent-to-artifact-type affinity: exact match 1.0, related 0.5-0.8,
/// unrelated 0.2. Broad intents treat every tier as moderately relevant.
pub fn type_preference_score(intent: Intent, artifact_type: ArtifactType) -> f32 {
    use ArtifactType as T;

    const UNRELATED: f32 = 0.2;
    const BROAD: f32 = 0.6;

    match intent {
        Intent::RetrieveMedications => match artifact_type {
            T::MedicationOrder | T::Prescription | T::MedicationList => 1.0,
            T::ClinicalNote | T::ProgressNote | T::Allergy => 0.6,
            T::DischargeSummary | T::Condition => 0.5,
            _ => UNRELATED,
        },
        Intent::RetrieveCarePlans => match artifact_type {
            T::CarePlan => 1.0,
            T::ProgressNote => 0.7,
            T::ClinicalNote | T::Appointment | T::Referral => 0.5,
            _ => UNRELATED,
        },
        Intent::RetrieveNotes => match artifact_type {
            T::ClinicalNote | T::ProgressNote | T::DischargeSummary => 1.0,
            T::Document => 0.7,
            T::Message | T::FormResponse => 0.5,
            _ => UNRELATED,
        },
        Intent::RetrieveAll | Intent::Summary | Intent::Comparison | Intent::Unknown => BROAD,
    }
}

pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }

    let mut min = f32::MAX;
    let mut max = f32::MIN;

    for s in scores {
        if !s.is_finite() {
            continue;
        }
        if *s < min {
            min = *s;
        }
        if *s > max {
            max = *s;
        }
    }

    if !min.is_finite() || !max.is_finite() {
        return scores.iter().map(|_| 0.0).collect();
    }

    if (max - min).abs() < f32::EPSILON {
        return vec![1.0; scores.len()];
    }

    scores
        .iter()
        .map(|score| {
            if score.is_finite() {
                clamp_unit((score - min) / (max - min))
            } else {
                0.0
            }
        })
        .collect()
}

/// Descending combined score; ties break on higher semantic score, then
/// newer `occurred_at`, then lexicographically smaller chunk id.
pub fn sort_candidates(candidates: &mut [RetrievalCandidate]) {
    candidates.sort_by(|a, b| {
        b.combined
            .partial_cmp(&a.combined)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                b.scores
                    .semantic
                    .partial_cmp(&a.scores.semantic)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| b.chunk.occurred_at.cmp(&a.chunk.occurred_at))
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
}

pub fn content_tokens(text: &str) -> HashSet<String> {
    text.to_ascii_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3)
        .map(std::borrow::ToOwned::to_owned)
        .collect()
}

pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    {
        intersection as f32 / union as f32
    }
}

/// Pairwise candidate similarity: Jaccard on content tokens blended with
/// the discrete same-artifact-type signal.
fn pair_similarity(
    a: &RetrievalCandidate,
    a_tokens: &HashSet<String>,
    b: &RetrievalCandidate,
    b_tokens: &HashSet<String>,
) -> f32 {
    let type_component = if a.chunk.artifact_type == b.chunk.artifact_type {
        1.0
    } else {
        0.0
    };
    0.6 * jaccard(a_tokens, b_tokens) + 0.4 * type_component
}

/// Greedy diversity re-ranking: repeatedly select the candidate maximizing
/// `combined - diversity_weight * max_similarity_to_selected`. Candidates
/// whose content overlap with a selected one exceeds `near_dup_threshold`
/// are demoted behind every distinct candidate.
pub fn diversity_rerank(
    mut candidates: Vec<RetrievalCandidate>,
    diversity_weight: f32,
    near_dup_threshold: f32,
) -> Vec<RetrievalCandidate> {
    if candidates.len() <= 1 {
        return candidates;
    }

    sort_candidates(&mut candidates);

    let tokens: Vec<HashSet<String>> = candidates
        .iter()
        .map(|c| content_tokens(&c.chunk.chunk_text))
        .collect();

    let mut remaining: Vec<(RetrievalCandidate, HashSet<String>)> =
        candidates.into_iter().zip(tokens).collect();
    let mut selected: Vec<(RetrievalCandidate, HashSet<String>)> = Vec::new();
    let mut demoted: Vec<RetrievalCandidate> = Vec::new();

    while !remaining.is_empty() {
        let mut best_idx = 0;
        let mut best_score = f32::MIN;
        let mut best_max_dup = 0.0f32;

        for (idx, (candidate, candidate_tokens)) in remaining.iter().enumerate() {
            let mut max_sim = 0.0f32;
            let mut max_dup = 0.0f32;
            for (kept, kept_tokens) in &selected {
                let sim = pair_similarity(candidate, candidate_tokens, kept, kept_tokens);
                max_sim = max_sim.max(sim);
                max_dup = max_dup.max(jaccard(candidate_tokens, kept_tokens));
            }
            let penalized = candidate.combined - diversity_weight * max_sim;
            if penalized > best_score {
                best_score = penalized;
                best_idx = idx;
                best_max_dup = max_dup;
            }
        }

        let (candidate, candidate_tokens) = remaining.swap_remove(best_idx);
        if best_max_dup > near_dup_threshold {
            demoted.push(candidate);
        } else {
            selected.push((candidate, candidate_tokens));
        }
    }

    let mut result: Vec<RetrievalCandidate> =
        selected.into_iter().map(|(candidate, _)| candidate).collect();
    demoted.sort_by(|a, b| b.combined.partial_cmp(&a.combined).unwrap_or(Ordering::Equal));
    result.extend(demoted);
    result
}
