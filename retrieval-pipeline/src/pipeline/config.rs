use serde::{Deserialize, Serialize};

use crate::scoring::ScoreWeights;

/// Per-request knobs for the integrated retriever. All fields participate
/// in the retrieval cache key, so two runs differing in any flag never
/// share a cached result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrieverConfig {
    /// Final candidate count returned to the caller.
    pub k: usize,
    /// How many top candidates the re-ranking stage rescores.
    pub rerank_top_k: usize,
    /// How many nearest neighbors the semantic arm requests.
    pub semantic_take: usize,
    /// How many keyword hits the BM25 arm contributes.
    pub keyword_take: usize,
    pub enable_reranking: bool,
    pub enable_diversification: bool,
    pub enable_time_decay: bool,
    /// Semantic-vs-keyword blending weight in the hybrid merge.
    pub hybrid_alpha: f32,
    /// Content-overlap level above which a candidate counts as a
    /// near-duplicate during diversification.
    pub diversity_threshold: f32,
    pub diversity_weight: f32,
    /// α in the multiplicative `(1 + α·recency)` time-decay boost.
    pub time_decay_rate: f32,
    pub weights: ScoreWeights,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            k: 10,
            rerank_top_k: 20,
            semantic_take: 30,
            keyword_take: 30,
            enable_reranking: true,
            enable_diversification: true,
            enable_time_decay: true,
            hybrid_alpha: 0.7,
            diversity_threshold: 0.85,
            diversity_weight: 0.3,
            time_decay_rate: 0.3,
            weights: ScoreWeights::default(),
        }
    }
}

impl RetrieverConfig {
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k.max(1);
        self
    }

    /// Minimal pass-through configuration: scoring only, no re-ranking,
    /// diversification or decay. Used by tests and degraded modes.
    pub fn plain() -> Self {
        Self {
            enable_reranking: false,
            enable_diversification: false,
            enable_time_decay: false,
            ..Self::default()
        }
    }
}
