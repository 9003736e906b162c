use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use futures::{stream::FuturesUnordered, StreamExt};
use query_understanding::{DateRange, StructuredQuery};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::{
    pipeline::IntegratedRetriever,
    rerank::rerank,
    scoring::{min_max_normalize, sort_candidates},
    IntegratedRetrievalResult, RetrievalCandidate, StageMetric,
};

pub const MAX_PARALLEL: usize = 10;

/// A date range longer than this is split into quarter-sized windows.
const SPLIT_THRESHOLD_DAYS: i64 = 183;
const QUARTER_DAYS: i64 = 91;

/// Integrated retrieval plus the fan-out accounting of a partitioned run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelRetrievalResult {
    pub result: IntegratedRetrievalResult,
    pub parallel_searches: usize,
    pub merge_time_ms: u64,
    pub deduplication_removed: usize,
    pub sequential_fallback: bool,
    pub speedup_factor: Option<f32>,
}

impl IntegratedRetriever {
    /// Partitions the query, runs one integrated retrieval per partition
    /// concurrently and merges the results. Falls back to a single
    /// sequential run when no partitioning rule applies or every partition
    /// fails.
    #[instrument(skip_all, fields(patient_id = %query.patient_id))]
    pub async fn parallel_retrieve(&self, query: &StructuredQuery) -> ParallelRetrievalResult {
        let partitions = partition_query(query);

        if partitions.len() < 2 {
            let result = self.retrieve(query).await;
            return ParallelRetrievalResult {
                result,
                parallel_searches: 1,
                merge_time_ms: 0,
                deduplication_removed: 0,
                sequential_fallback: true,
                speedup_factor: None,
            };
        }

        let started = Instant::now();
        let parallel_searches = partitions.len();
        debug!(partitions = parallel_searches, "Running partitioned retrieval");

        let mut runs = FuturesUnordered::new();
        for partition in &partitions {
            runs.push(async move { self.retrieve(partition).await });
        }

        let mut partial_results: Vec<IntegratedRetrievalResult> = Vec::new();
        while let Some(result) = runs.next().await {
            if let Some(error) = &result.error {
                warn!(%error, "Partition failed; skipping its candidates");
                continue;
            }
            partial_results.push(result);
        }

        if partial_results.is_empty() {
            warn!("All partitions failed; falling back to sequential retrieval");
            let result = self.retrieve(query).await;
            return ParallelRetrievalResult {
                result,
                parallel_searches,
                merge_time_ms: 0,
                deduplication_removed: 0,
                sequential_fallback: true,
                speedup_factor: None,
            };
        }

        let merge_started = Instant::now();
        let (merged, deduplication_removed) = merge_partitions(query, &partial_results, self);
        let merge_time_ms = elapsed_ms(merge_started);
        let total_time_ms = elapsed_ms(started);

        let partition_time_sum: u64 = partial_results.iter().map(|r| r.retrieval_time_ms).sum();
        #[allow(clippy::cast_precision_loss)]
        let speedup_factor = if total_time_ms > 0 {
            Some(partition_time_sum as f32 / total_time_ms as f32)
        } else {
            None
        };

        info!(
            parallel_searches,
            merged_candidates = merged.candidates.len(),
            deduplication_removed,
            merge_time_ms,
            "Parallel retrieval merged"
        );

        ParallelRetrievalResult {
            result: IntegratedRetrievalResult {
                retrieval_time_ms: total_time_ms,
                ..merged
            },
            parallel_searches,
            merge_time_ms,
            deduplication_removed,
            sequential_fallback: false,
            speedup_factor,
        }
    }
}

/// Partitioning policy, first rule wins:
/// 1. one partition per artifact type when the caller supplied a strict
///    multi-type filter;
/// 2. quarter-sized windows when the date range spans more than six
///    months, capped at `MAX_PARALLEL`;
/// 3. otherwise no partitioning (sequential fallback).
pub fn partition_query(query: &StructuredQuery) -> Vec<StructuredQuery> {
    if query.filters.strict_types {
        if let Some(types) = &query.filters.artifact_types {
            if types.len() >= 2 {
                return types
                    .iter()
                    .map(|artifact_type| {
                        let mut partition = query.clone();
                        partition.filters.artifact_types = Some(vec![*artifact_type]);
                        partition.filters.strict_types = true;
                        partition
                    })
                    .collect();
            }
        }
    }

    if let Some(range) = query.filters.date_range {
        let span_days = (range.to - range.from).num_days();
        if span_days > SPLIT_THRESHOLD_DAYS {
            return split_by_quarter(query, range.from, range.to, span_days);
        }
    }

    Vec::new()
}

/// Equivalent to the unstable `i64::div_ceil`.
fn div_ceil_i64(lhs: i64, rhs: i64) -> i64 {
    let d = lhs / rhs;
    let r = lhs % rhs;
    if (r > 0 && rhs > 0) || (r < 0 && rhs < 0) {
        d + 1
    } else {
        d
    }
}

fn split_by_quarter(
    query: &StructuredQuery,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    span_days: i64,
) -> Vec<StructuredQuery> {
    let window_count = usize::try_from(div_ceil_i64(span_days, QUARTER_DAYS))
        .unwrap_or(MAX_PARALLEL)
        .clamp(2, MAX_PARALLEL);
    let window_days = div_ceil_i64(span_days, i64::try_from(window_count).unwrap_or(1)).max(1);

    let mut partitions = Vec::with_capacity(window_count);
    let mut window_start = from;
    while window_start < to && partitions.len() < window_count {
        let window_end = (window_start + Duration::days(window_days)).min(to);
        let mut partition = query.clone();
        partition.filters.date_range = Some(DateRange {
            from: window_start,
            to: window_end,
        });
        partitions.push(partition);
        window_start = window_end + Duration::milliseconds(1);
    }

    partitions
}

/// Merge policy: per-partition min-max normalization, dedup by chunk id
/// keeping the higher-scored instance, re-rank against the original query,
/// stage metrics averaged across partitions.
fn merge_partitions(
    query: &StructuredQuery,
    partials: &[IntegratedRetrievalResult],
    retriever: &IntegratedRetriever,
) -> (IntegratedRetrievalResult, usize) {
    let config = retriever.config();
    let mut by_id: HashMap<String, RetrievalCandidate> = HashMap::new();
    let mut deduplication_removed = 0usize;

    for partial in partials {
        let normalized = min_max_normalize(
            &partial.candidates.iter().map(|c| c.combined).collect::<Vec<_>>(),
        );
        for (candidate, normalized_score) in partial.candidates.iter().zip(normalized) {
            let mut incoming = candidate.clone();
            incoming.combined = normalized_score;

            match by_id.get_mut(&incoming.chunk.id) {
                Some(existing) => {
                    deduplication_removed += 1;
                    if incoming.combined > existing.combined {
                        *existing = incoming;
                    }
                }
                None => {
                    by_id.insert(incoming.chunk.id.clone(), incoming);
                }
            }
        }
    }

    let mut candidates: Vec<RetrievalCandidate> = by_id.into_values().collect();
    sort_candidates(&mut candidates);
    rerank(
        &mut candidates,
        &query.original_query,
        &query.entities,
        config.rerank_top_k,
    );
    candidates.truncate(config.k.max(1));
    for (index, candidate) in candidates.iter_mut().enumerate() {
        candidate.rank = index + 1;
    }

    let merged = IntegratedRetrievalResult {
        candidates,
        total_searched: partials.iter().map(|p| p.total_searched).max().unwrap_or(0),
        filtered_count: partials.iter().map(|p| p.filtered_count).sum(),
        retrieval_time_ms: 0,
        stage_metrics: average_stage_metrics(partials),
        cache_hit: false,
        error: None,
    };

    (merged, deduplication_removed)
}

fn average_stage_metrics(partials: &[IntegratedRetrievalResult]) -> Vec<StageMetric> {
    let mut grouped: Vec<(crate::StageKind, Vec<&StageMetric>)> = Vec::new();

    for metric in partials.iter().flat_map(|p| &p.stage_metrics) {
        match grouped.iter_mut().find(|(kind, _)| *kind == metric.stage) {
            Some((_, metrics)) => metrics.push(metric),
            None => grouped.push((metric.stage, vec![metric])),
        }
    }

    grouped
        .into_iter()
        .map(|(stage, metrics)| {
            let count = metrics.len() as u64;
            StageMetric {
                stage,
                duration_ms: metrics.iter().map(|m| m.duration_ms).sum::<u64>() / count.max(1),
                input_count: metrics.iter().map(|m| m.input_count).sum::<usize>()
                    / metrics.len().max(1),
                output_count: metrics.iter().map(|m| m.output_count).sum::<usize>()
                    / metrics.len().max(1),
            }
        })
        .collect()
}

fn elapsed_ms(instant: Instant) -> u64 {
    u64::try_from(instant.elapsed().as_millis()).unwrap_or(u64::MAX)
}
