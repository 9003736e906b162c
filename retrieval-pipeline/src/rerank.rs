use query_understanding::Entity;

use crate::{
    scoring::{clamp_unit, content_tokens, jaccard},
    RetrievalCandidate,
};

const PRIOR_WEIGHT: f32 = 0.7;
const ENTITY_COVERAGE_WEIGHT: f32 = 0.2;
const QUERY_OVERLAP_WEIGHT: f32 = 0.1;

/// Fraction of query entities whose surface or canonical form appears in
/// the chunk text (case-insensitive).
pub fn entity_coverage(entities: &[Entity], chunk_text: &str) -> f32 {
    if entities.is_empty() {
        return 0.0;
    }
    let haystack = chunk_text.to_ascii_lowercase();
    let covered = entities
        .iter()
        .filter(|entity| {
            haystack.contains(&entity.text.to_ascii_lowercase())
                || haystack.contains(&entity.normalized.to_ascii_lowercase())
        })
        .count();

    #[allow(clippy::cast_precision_loss)]
    {
        covered as f32 / entities.len() as f32
    }
}

pub fn query_overlap(query: &str, chunk_text: &str) -> f32 {
    jaccard(&content_tokens(query), &content_tokens(chunk_text))
}

/// Re-ranks the top-K candidates in place by blending the prior combined
/// score with entity coverage and query-token overlap. Candidates beyond
/// the top-K keep their order behind the re-ranked head. The sort is
/// stable, so equal scores preserve input order.
pub fn rerank(
    candidates: &mut Vec<RetrievalCandidate>,
    query: &str,
    entities: &[Entity],
    top_k: usize,
) {
    if candidates.len() <= 1 || top_k == 0 {
        return;
    }

    let head_len = top_k.min(candidates.len());
    let mut head: Vec<RetrievalCandidate> = candidates.drain(..head_len).collect();

    for candidate in &mut head {
        let coverage = entity_coverage(entities, &candidate.chunk.chunk_text);
        let overlap = query_overlap(query, &candidate.chunk.chunk_text);
        candidate.combined = clamp_unit(
            PRIOR_WEIGHT * candidate.combined
                + ENTITY_COVERAGE_WEIGHT * coverage
                + QUERY_OVERLAP_WEIGHT * overlap,
        );
    }

    head.sort_by(|a, b| {
        b.combined
            .partial_cmp(&a.combined)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    head.append(candidates);
    *candidates = head;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::storage::types::{artifact::ArtifactType, record_chunk::RecordChunk};
    use query_understanding::EntityType;
    use crate::SignalScores;

    fn entity(text: &str, normalized: &str) -> Entity {
        Entity {
            text: text.to_owned(),
            entity_type: EntityType::Medication,
            normalized: normalized.to_owned(),
            confidence: 0.95,
        }
    }

    fn candidate(id: &str, text: &str, combined: f32) -> RetrievalCandidate {
        let mut chunk = RecordChunk::new(
            "a1".into(),
            "p1".into(),
            ArtifactType::ClinicalNote,
            text.into(),
            0,
            text.len(),
            Utc::now(),
            None,
            "https://emr.example.org/a/1".into(),
        );
        chunk.id = id.to_owned();
        let mut c = RetrievalCandidate::new(chunk, SignalScores::default());
        c.combined = combined;
        c
    }

    #[test]
    fn coverage_counts_surface_and_canonical_forms() {
        let entities = vec![
            entity("Glucophage", "metformin"),
            entity("lisinopril", "lisinopril"),
        ];
        let text = "Patient continues metformin 500mg; no other changes.";

        assert!((entity_coverage(&entities, text) - 0.5).abs() < 1e-6);
        assert!((entity_coverage(&[], text) - 0.0).abs() < 1e-6);
    }

    #[test]
    fn rerank_promotes_entity_bearing_chunk() {
        // Slightly lower prior, but the chunk actually mentions the
        // queried medication.
        let mut candidates = vec![
            candidate("chunk_1", "Follow up scheduled for blood pressure.", 0.80),
            candidate("chunk_2", "Metformin 500mg twice daily continues.", 0.75),
        ];

        rerank(
            &mut candidates,
            "metformin dosage",
            &[entity("metformin", "metformin")],
            20,
        );

        assert_eq!(candidates[0].chunk.id, "chunk_2");
    }

    #[test]
    fn candidates_beyond_top_k_keep_their_order() {
        let mut candidates = vec![
            candidate("chunk_1", "first", 0.9),
            candidate("chunk_2", "second", 0.8),
            candidate("chunk_3", "tail stays put", 0.2),
            candidate("chunk_4", "tail stays put too", 0.1),
        ];

        rerank(&mut candidates, "unrelated query", &[], 2);

        assert_eq!(candidates[2].chunk.id, "chunk_3");
        assert_eq!(candidates[3].chunk.id, "chunk_4");
    }

    #[test]
    fn stable_sort_preserves_input_order_on_ties() {
        let mut candidates = vec![
            candidate("chunk_a", "same text", 0.5),
            candidate("chunk_b", "same text", 0.5),
        ];

        rerank(&mut candidates, "no overlap here at all", &[], 10);

        assert_eq!(candidates[0].chunk.id, "chunk_a");
        assert_eq!(candidates[1].chunk.id, "chunk_b");
    }
}
