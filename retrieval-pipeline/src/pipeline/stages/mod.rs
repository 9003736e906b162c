use std::collections::HashMap;

use async_trait::async_trait;
use common::{error::AppError, storage::types::record_chunk::RecordChunk};
use query_understanding::expansion::QueryExpander;
use tracing::{debug, instrument};

use crate::{
    highlight::{build_snippet, generate_highlights},
    keyword::Bm25Index,
    rerank::rerank,
    scoring::{
        clamp_unit, diversity_rerank, min_max_normalize, recency_score, sort_candidates,
        type_preference_score,
    },
    RetrievalCandidate, SignalScores,
};

use super::{PipelineContext, PipelineStage, StageKind};

#[derive(Debug, Clone, Copy)]
pub struct MetadataFilterStage;

#[async_trait]
impl PipelineStage for MetadataFilterStage {
    fn kind(&self) -> StageKind {
        StageKind::MetadataFilter
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        metadata_filter(ctx).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HybridSearchStage;

#[async_trait]
impl PipelineStage for HybridSearchStage {
    fn kind(&self) -> StageKind {
        StageKind::HybridSearch
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        hybrid_search(ctx).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScoreStage;

#[async_trait]
impl PipelineStage for ScoreStage {
    fn kind(&self) -> StageKind {
        StageKind::Score
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        score(ctx);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RerankStage;

#[async_trait]
impl PipelineStage for RerankStage {
    fn kind(&self) -> StageKind {
        StageKind::Rerank
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        rerank_candidates(ctx);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DiversifyStage;

#[async_trait]
impl PipelineStage for DiversifyStage {
    fn kind(&self) -> StageKind {
        StageKind::Diversify
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        diversify(ctx);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TimeDecayStage;

#[async_trait]
impl PipelineStage for TimeDecayStage {
    fn kind(&self) -> StageKind {
        StageKind::TimeDecay
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        time_decay(ctx);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HighlightStage;

#[async_trait]
impl PipelineStage for HighlightStage {
    fn kind(&self) -> StageKind {
        StageKind::Highlight
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        highlight(ctx);
        Ok(())
    }
}

/// Stage 1: prune the chunk population by patient, optional strict
/// artifact-type filter and optional date window.
#[instrument(level = "trace", skip_all)]
async fn metadata_filter(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    let query = ctx.query;
    let total = RecordChunk::count_for_patient(&query.patient_id, ctx.db).await?;

    let artifact_types = strict_types(ctx);
    let population = RecordChunk::filtered(
        ctx.db,
        &query.patient_id,
        artifact_types,
        query.date_bounds(),
    )
    .await?;

    ctx.total_searched = total;
    ctx.filtered_count = population.len();
    debug!(
        total,
        surviving = population.len(),
        removed = total.saturating_sub(population.len()),
        "Metadata filtering complete"
    );
    ctx.population = population;

    Ok(())
}

/// Stage 2: semantic k-NN plus in-process BM25 over the filtered
/// population, merged by union. `hybrid_alpha` weights the two arms in the
/// provisional ordering of the merged set.
#[instrument(level = "trace", skip_all)]
async fn hybrid_search(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    if ctx.population.is_empty() {
        return Ok(());
    }

    let query = ctx.query;
    let config = ctx.config;

    let embedding = ctx
        .embedder
        .embed(&query.original_query)
        .await
        .map_err(|e| AppError::InternalError(format!("query embedding failed: {e}")))?;

    let semantic_hits = RecordChunk::vector_search(
        config.semantic_take,
        embedding,
        ctx.db,
        &query.patient_id,
        strict_types(ctx),
        query.date_bounds(),
    )
    .await?;

    let expander = QueryExpander::default();
    let terms = expander.expanded_search_terms(&query.original_query, &query.entities);
    let bm25 = Bm25Index::build(
        &ctx.population
            .iter()
            .map(|c| c.chunk_text.as_str())
            .collect::<Vec<_>>(),
    );
    let keyword_hits = bm25.search(&terms, config.keyword_take);
    let keyword_normalized = min_max_normalize(
        &keyword_hits.iter().map(|(_, score)| *score).collect::<Vec<_>>(),
    );

    let mut by_id: HashMap<String, RetrievalCandidate> = HashMap::new();

    for hit in semantic_hits {
        let id = hit.chunk.id.clone();
        by_id
            .entry(id)
            .or_insert_with(|| RetrievalCandidate::new(hit.chunk, SignalScores::default()))
            .scores
            .semantic = clamp_unit(hit.score);
    }

    for ((doc_index, _), normalized) in keyword_hits.iter().zip(keyword_normalized) {
        let Some(chunk) = ctx.population.get(*doc_index) else {
            continue;
        };
        by_id
            .entry(chunk.id.clone())
            .or_insert_with(|| RetrievalCandidate::new(chunk.clone(), SignalScores::default()))
            .scores
            .keyword = normalized;
    }

    let mut candidates: Vec<RetrievalCandidate> = by_id.into_values().collect();
    let alpha = clamp_unit(config.hybrid_alpha);
    for candidate in &mut candidates {
        candidate.combined =
            alpha * candidate.scores.semantic + (1.0 - alpha) * candidate.scores.keyword;
    }
    sort_candidates(&mut candidates);

    debug!(
        merged = candidates.len(),
        "Hybrid search merged semantic and keyword arms"
    );
    ctx.candidates = candidates;

    Ok(())
}

/// Stage 3: fill in recency and type-preference signals, fuse with the
/// configured weights, then min-max normalize over the candidate set.
fn score(ctx: &mut PipelineContext<'_>) {
    if ctx.candidates.is_empty() {
        return;
    }

    let weights = ctx.config.weights.normalized();
    let intent = ctx.query.intent;
    let now = ctx.now;

    for candidate in &mut ctx.candidates {
        candidate.scores.recency = recency_score(candidate.chunk.occurred_at, now);
        candidate.scores.type_preference =
            type_preference_score(intent, candidate.chunk.artifact_type);
        candidate.combined = weights.combine(&candidate.scores);
    }

    let normalized = min_max_normalize(
        &ctx.candidates.iter().map(|c| c.combined).collect::<Vec<_>>(),
    );
    for (candidate, value) in ctx.candidates.iter_mut().zip(normalized) {
        candidate.combined = value;
    }

    sort_candidates(&mut ctx.candidates);
}

/// Stage 4: blend entity coverage and query overlap into the top-K.
fn rerank_candidates(ctx: &mut PipelineContext<'_>) {
    if !ctx.config.enable_reranking || ctx.candidates.len() <= 1 {
        return;
    }
    rerank(
        &mut ctx.candidates,
        &ctx.query.original_query,
        &ctx.query.entities,
        ctx.config.rerank_top_k,
    );
}

/// Stage 5: penalize redundancy, demote near-duplicates.
fn diversify(ctx: &mut PipelineContext<'_>) {
    if !ctx.config.enable_diversification || ctx.candidates.len() <= 1 {
        return;
    }
    let candidates = std::mem::take(&mut ctx.candidates);
    ctx.candidates = diversity_rerank(
        candidates,
        ctx.config.diversity_weight,
        ctx.config.diversity_threshold,
    );
}

/// Stage 6: multiplicative recency boost `(1 + α·recency)`.
fn time_decay(ctx: &mut PipelineContext<'_>) {
    if !ctx.config.enable_time_decay || ctx.candidates.is_empty() {
        return;
    }
    let rate = ctx.config.time_decay_rate;
    for candidate in &mut ctx.candidates {
        candidate.combined = clamp_unit(candidate.combined * (1.0 + rate * candidate.scores.recency));
    }
    ctx.candidates
        .sort_by(|a, b| b.combined.partial_cmp(&a.combined).unwrap_or(std::cmp::Ordering::Equal));
}

/// Stage 7: cap at k, assign ranks, compute highlights and snippets.
fn highlight(ctx: &mut PipelineContext<'_>) {
    ctx.candidates.truncate(ctx.config.k.max(1));

    let query_terms: Vec<String> = ctx
        .query
        .original_query
        .to_ascii_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3)
        .map(std::borrow::ToOwned::to_owned)
        .collect();

    for (index, candidate) in ctx.candidates.iter_mut().enumerate() {
        candidate.highlights = generate_highlights(
            &candidate.chunk.chunk_text,
            &query_terms,
            &ctx.query.entities,
            true,
        );
        candidate.snippet = build_snippet(&candidate.chunk.chunk_text, &candidate.highlights);
        candidate.rank = index + 1;
    }
}

fn strict_types<'q>(
    ctx: &PipelineContext<'q>,
) -> Option<&'q [common::storage::types::artifact::ArtifactType]> {
    if ctx.query.filters.strict_types {
        ctx.query.filters.artifact_types.as_deref()
    } else {
        None
    }
}
