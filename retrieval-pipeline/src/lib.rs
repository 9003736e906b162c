pub mod cache;
pub mod highlight;
pub mod keyword;
pub mod parallel;
pub mod pipeline;
pub mod rerank;
pub mod scoring;

use common::storage::types::record_chunk::RecordChunk;
use serde::{Deserialize, Serialize};

pub use cache::RetrievalCache;
pub use highlight::{Highlight, HighlightKind};
pub use parallel::{ParallelRetrievalResult, MAX_PARALLEL};
pub use pipeline::{config::RetrieverConfig, IntegratedRetriever, StageKind};
pub use scoring::{ScoreWeights, SignalScores};

/// A chunk paired with its retrieval signals, snippet and highlights.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalCandidate {
    pub chunk: RecordChunk,
    pub scores: SignalScores,
    /// Fused score; re-scored by later stages, min-max normalized over the
    /// candidate set after initial scoring.
    pub combined: f32,
    pub snippet: String,
    pub highlights: Vec<Highlight>,
    /// 1-based position in the final ordering.
    pub rank: usize,
}

impl RetrievalCandidate {
    pub fn new(chunk: RecordChunk, scores: SignalScores) -> Self {
        Self {
            chunk,
            scores,
            combined: 0.0,
            snippet: String::new(),
            highlights: Vec::new(),
            rank: 0,
        }
    }
}

/// Wall-clock and cardinality accounting for one pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageMetric {
    pub stage: StageKind,
    pub duration_ms: u64,
    pub input_count: usize,
    pub output_count: usize,
}

/// Output of one integrated retrieval run. An empty candidate list is a
/// valid outcome, not an error; `error` names the stage that degraded the
/// pipeline when one did.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct IntegratedRetrievalResult {
    pub candidates: Vec<RetrievalCandidate>,
    pub total_searched: usize,
    pub filtered_count: usize,
    pub retrieval_time_ms: u64,
    pub stage_metrics: Vec<StageMetric>,
    pub cache_hit: bool,
    pub error: Option<String>,
}
