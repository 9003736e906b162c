pub mod config;
pub mod stages;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::record_chunk::RecordChunk},
    utils::embedding::EmbeddingProvider,
};
use query_understanding::StructuredQuery;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::{cache::RetrievalCache, IntegratedRetrievalResult, RetrievalCandidate, StageMetric};
use config::RetrieverConfig;
use stages::{
    DiversifyStage, HighlightStage, HybridSearchStage, MetadataFilterStage, RerankStage,
    ScoreStage, TimeDecayStage,
};

/// The seven sequential stages of one integrated retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    MetadataFilter,
    HybridSearch,
    Score,
    Rerank,
    Diversify,
    TimeDecay,
    Highlight,
}

impl StageKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MetadataFilter => "metadata_filter",
            Self::HybridSearch => "hybrid_search",
            Self::Score => "score",
            Self::Rerank => "rerank",
            Self::Diversify => "diversify",
            Self::TimeDecay => "time_decay",
            Self::Highlight => "highlight",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn kind(&self) -> StageKind;
    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError>;
}

pub type BoxedStage = Box<dyn PipelineStage>;

/// Mutable state threaded through the stages of one retrieval run. The
/// candidate set only narrows or is re-scored; stages never resurrect
/// pruned chunks.
pub struct PipelineContext<'a> {
    pub db: &'a SurrealDbClient,
    pub embedder: &'a EmbeddingProvider,
    pub query: &'a StructuredQuery,
    pub config: &'a RetrieverConfig,
    pub now: DateTime<Utc>,
    pub population: Vec<RecordChunk>,
    pub total_searched: usize,
    pub filtered_count: usize,
    pub candidates: Vec<RetrievalCandidate>,
}

impl<'a> PipelineContext<'a> {
    fn new(
        db: &'a SurrealDbClient,
        embedder: &'a EmbeddingProvider,
        query: &'a StructuredQuery,
        config: &'a RetrieverConfig,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            db,
            embedder,
            query,
            config,
            now,
            population: Vec::new(),
            total_searched: 0,
            filtered_count: 0,
            candidates: Vec::new(),
        }
    }

    fn active_count(&self) -> usize {
        if self.candidates.is_empty() {
            self.population.len()
        } else {
            self.candidates.len()
        }
    }
}

fn build_stages() -> Vec<BoxedStage> {
    vec![
        Box::new(MetadataFilterStage),
        Box::new(HybridSearchStage),
        Box::new(ScoreStage),
        Box::new(RerankStage),
        Box::new(DiversifyStage),
        Box::new(TimeDecayStage),
        Box::new(HighlightStage),
    ]
}

/// Runs the seven-stage retrieval pipeline against one structured query.
/// Never fails outright: stage errors degrade the run to whatever was last
/// computed, tagged with the failing stage.
pub struct IntegratedRetriever {
    db: Arc<SurrealDbClient>,
    embedder: Arc<EmbeddingProvider>,
    cache: Option<Arc<RetrievalCache>>,
    config: RetrieverConfig,
}

impl IntegratedRetriever {
    pub fn new(
        db: Arc<SurrealDbClient>,
        embedder: Arc<EmbeddingProvider>,
        config: RetrieverConfig,
    ) -> Self {
        Self {
            db,
            embedder,
            cache: None,
            config,
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<RetrievalCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub const fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    pub async fn retrieve(&self, query: &StructuredQuery) -> IntegratedRetrievalResult {
        self.retrieve_with_config(query, &self.config).await
    }

    #[instrument(skip_all, fields(patient_id = %query.patient_id, intent = %query.intent))]
    pub async fn retrieve_with_config(
        &self,
        query: &StructuredQuery,
        config: &RetrieverConfig,
    ) -> IntegratedRetrievalResult {
        let started = Instant::now();

        let cache_key = self
            .cache
            .as_ref()
            .map(|_| RetrievalCache::key(query, config));
        if let (Some(cache), Some(key)) = (self.cache.as_deref(), cache_key.as_deref()) {
            if let Some(mut hit) = cache.get(key) {
                debug!("Retrieval cache hit");
                hit.cache_hit = true;
                hit.retrieval_time_ms = elapsed_ms(started);
                return hit;
            }
        }

        let mut ctx = PipelineContext::new(&self.db, &self.embedder, query, config, Utc::now());
        let mut stage_metrics: Vec<StageMetric> = Vec::new();
        let mut error: Option<String> = None;

        for stage in build_stages() {
            let input_count = ctx.active_count();
            let stage_started = Instant::now();

            let outcome = stage.execute(&mut ctx).await;
            let duration_ms = elapsed_ms(stage_started);
            let metric_input = if stage.kind() == StageKind::MetadataFilter {
                ctx.total_searched
            } else {
                input_count
            };
            stage_metrics.push(StageMetric {
                stage: stage.kind(),
                duration_ms,
                input_count: metric_input,
                output_count: ctx.active_count(),
            });

            if let Err(err) = outcome {
                warn!(
                    stage = %stage.kind(),
                    error = %err,
                    "Retrieval stage failed; returning degraded result"
                );
                error = Some(format!("{}: {err}", stage.kind()));
                break;
            }
        }

        let result = IntegratedRetrievalResult {
            candidates: ctx.candidates,
            total_searched: ctx.total_searched,
            filtered_count: ctx.filtered_count,
            retrieval_time_ms: elapsed_ms(started),
            stage_metrics,
            cache_hit: false,
            error,
        };

        info!(
            candidates = result.candidates.len(),
            total_searched = result.total_searched,
            filtered_count = result.filtered_count,
            retrieval_time_ms = result.retrieval_time_ms,
            degraded = result.error.is_some(),
            "Integrated retrieval finished"
        );

        if result.error.is_none() {
            if let (Some(cache), Some(key)) = (self.cache.as_deref(), cache_key) {
                cache.insert(key, result.clone());
            }
        }

        result
    }
}

fn elapsed_ms(instant: Instant) -> u64 {
    u64::try_from(instant.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use common::storage::types::artifact::ArtifactType;
    use query_understanding::QueryUnderstanding;
    use uuid::Uuid;

    async fn setup_db() -> Arc<SurrealDbClient> {
        let db = SurrealDbClient::memory("retrieval_test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb");
        db.ensure_initialized(64).await.expect("indexes");
        Arc::new(db)
    }

    fn embedder() -> Arc<EmbeddingProvider> {
        Arc::new(EmbeddingProvider::new_hashed(64).expect("hashed provider"))
    }

    fn structured(query: &str) -> StructuredQuery {
        let now = Utc.with_ymd_and_hms(2024, 10, 15, 9, 0, 0).single().expect("clock");
        QueryUnderstanding::new()
            .understand(query, "patient_1", now)
            .expect("structured query")
    }

    async fn seed_chunk(
        db: &SurrealDbClient,
        embedder: &EmbeddingProvider,
        artifact_type: ArtifactType,
        text: &str,
        days_ago: i64,
    ) -> RecordChunk {
        let chunk = RecordChunk::new(
            format!("artifact_{days_ago}_{artifact_type}"),
            "patient_1".into(),
            artifact_type,
            text.into(),
            0,
            text.len(),
            Utc::now() - Duration::days(days_ago),
            None,
            "https://emr.example.org/artifacts/1".into(),
        );
        let embedding = embedder.embed(text).await.expect("embedding");
        RecordChunk::store_with_embedding(chunk.clone(), embedding, db)
            .await
            .expect("store chunk");
        chunk
    }

    #[tokio::test]
    async fn medication_query_retrieves_medication_chunk_first() {
        let db = setup_db().await;
        let embedder = embedder();

        let medication_chunk = seed_chunk(
            &db,
            &embedder,
            ArtifactType::ClinicalNote,
            "Patient prescribed Metformin 500mg twice daily for Type 2 Diabetes management.",
            2,
        )
        .await;
        seed_chunk(
            &db,
            &embedder,
            ArtifactType::CarePlan,
            "Follow up scheduled in 2 weeks for blood pressure monitoring.",
            1,
        )
        .await;

        let retriever =
            IntegratedRetriever::new(Arc::clone(&db), Arc::clone(&embedder), RetrieverConfig::default());
        let result = retriever
            .retrieve(&structured("What medications is the patient taking?"))
            .await;

        assert!(result.error.is_none());
        assert_eq!(result.total_searched, 2);
        assert_eq!(result.filtered_count, 2);
        assert!(!result.candidates.is_empty());
        assert_eq!(
            result.candidates[0].chunk.id, medication_chunk.id,
            "the metformin chunk should rank first despite its note type"
        );
        assert_eq!(result.candidates[0].rank, 1);
        assert!(!result.candidates[0].snippet.is_empty());
        assert_eq!(result.stage_metrics.len(), 7);
    }

    #[tokio::test]
    async fn empty_population_is_a_valid_empty_result() {
        let db = setup_db().await;
        let retriever = IntegratedRetriever::new(db, embedder(), RetrieverConfig::default());

        let result = retriever.retrieve(&structured("any notes on file?")).await;

        assert!(result.error.is_none());
        assert!(result.candidates.is_empty());
        assert_eq!(result.total_searched, 0);
        assert_eq!(result.filtered_count, 0);
    }

    #[tokio::test]
    async fn date_filter_excludes_out_of_window_chunks() {
        let db = setup_db().await;
        let embedder = embedder();

        seed_chunk(
            &db,
            &embedder,
            ArtifactType::ClinicalNote,
            "Recent visit documented improvement.",
            10,
        )
        .await;
        seed_chunk(
            &db,
            &embedder,
            ArtifactType::ClinicalNote,
            "Old visit documented baseline.",
            400,
        )
        .await;

        let retriever = IntegratedRetriever::new(db, embedder, RetrieverConfig::default());
        let mut query = structured("visits in the last 3 months");
        // The parser ran against a fixed 2024 clock; re-anchor the window to
        // the live clock the seeded chunks used.
        query.filters.date_range = Some(query_understanding::DateRange {
            from: Utc::now() - Duration::days(90),
            to: Utc::now(),
        });

        let result = retriever.retrieve(&query).await;

        assert_eq!(result.filtered_count, 1);
        assert!(result
            .candidates
            .iter()
            .all(|c| c.chunk.chunk_text.contains("Recent")));
    }

    #[tokio::test]
    async fn normalized_scores_span_unit_interval() {
        let db = setup_db().await;
        let embedder = embedder();

        for (text, days) in [
            ("Metformin dosage discussion and diabetes management.", 3),
            ("Lisinopril for blood pressure control.", 30),
            ("Annual physical with no complaints.", 200),
        ] {
            seed_chunk(&db, &embedder, ArtifactType::ClinicalNote, text, days).await;
        }

        // Plain scoring keeps the min-max property observable at the output.
        let retriever = IntegratedRetriever::new(db, embedder, RetrieverConfig::plain());
        let result = retriever.retrieve(&structured("metformin diabetes")).await;

        assert!(result.candidates.len() >= 2);
        let max = result
            .candidates
            .iter()
            .map(|c| c.combined)
            .fold(f32::MIN, f32::max);
        let min = result
            .candidates
            .iter()
            .map(|c| c.combined)
            .fold(f32::MAX, f32::min);
        assert!((max - 1.0).abs() < 1e-6, "max combined should be 1.0, got {max}");
        assert!(min.abs() < 1e-6, "min combined should be 0.0, got {min}");
    }

    #[tokio::test]
    async fn cache_hit_returns_same_candidates_fast_path() {
        let db = setup_db().await;
        let embedder = embedder();
        seed_chunk(
            &db,
            &embedder,
            ArtifactType::MedicationOrder,
            "Metformin 500mg order placed.",
            1,
        )
        .await;

        let cache = Arc::new(RetrievalCache::new(300));
        let retriever = IntegratedRetriever::new(db, embedder, RetrieverConfig::default())
            .with_cache(Arc::clone(&cache));

        let query = structured("metformin order");
        let first = retriever.retrieve(&query).await;
        assert!(!first.cache_hit);

        let second = retriever.retrieve(&query).await;
        assert!(second.cache_hit);
        assert_eq!(
            first.candidates.len(),
            second.candidates.len(),
            "cached result must carry the full candidate set"
        );
        assert_eq!(second.stage_metrics.len(), first.stage_metrics.len());
    }

    #[tokio::test]
    async fn k_bounds_the_candidate_count() {
        let db = setup_db().await;
        let embedder = embedder();

        for i in 0..8 {
            seed_chunk(
                &db,
                &embedder,
                ArtifactType::ClinicalNote,
                &format!("Visit note number {i} documenting blood pressure checks."),
                i + 1,
            )
            .await;
        }

        let retriever = IntegratedRetriever::new(
            db,
            embedder,
            RetrieverConfig::default().with_k(3),
        );
        let result = retriever.retrieve(&structured("blood pressure notes")).await;

        assert!(result.candidates.len() <= 3);
        let ranks: Vec<usize> = result.candidates.iter().map(|c| c.rank).collect();
        assert_eq!(ranks, (1..=result.candidates.len()).collect::<Vec<_>>());
    }
}
