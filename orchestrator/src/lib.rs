pub mod audit;
pub mod response;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use common::{
    error::{AppError, ErrorCode},
    utils::circuit_breaker::CircuitBreaker,
};
use generation_pipeline::{
    AnswerGenerationAgent, ConfidenceCalibrator, GeneratedAnswer,
};
use query_understanding::{
    ConversationManager, ConversationTurn, QueryUnderstanding, StructuredQuery,
};
use retrieval_pipeline::{IntegratedRetrievalResult, IntegratedRetriever, RetrievalCandidate};
use tracing::{info, instrument, warn};

use audit::{AuditLogger, AuditRecord, TracingAuditLogger};
use response::{
    relative_date, user_message, ConfidenceSummary, ErrorBody, ProvenanceEntry, ResponseMetadata,
    StageTiming, UiResponse,
};

pub use response::UiResponse as Response;

/// How many retrieved records a partial (deadline-expired) response shows.
const PARTIAL_RESULT_COUNT: usize = 3;

const PARTIAL_SHORT_ANSWER: &str =
    "Query is taking longer than expected. Showing top retrieved records.";
const EMPTY_SHORT_ANSWER: &str =
    "No supporting evidence was found in this patient's records for this question.";

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub query: String,
    pub patient_id: String,
    pub session_id: Option<String>,
}

/// End-to-end pipeline: query_understanding → retrieval → generation →
/// confidence_scoring → provenance_formatting → response_building →
/// audit_logging, all under one hard deadline. The orchestrator is the
/// sole emitter of the user-visible response object.
pub struct Orchestrator {
    qua: QueryUnderstanding,
    conversations: Arc<ConversationManager>,
    retriever: Arc<IntegratedRetriever>,
    answer_agent: AnswerGenerationAgent,
    calibrator: ConfidenceCalibrator,
    generation_breaker: CircuitBreaker,
    audit: Arc<dyn AuditLogger>,
    timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        conversations: Arc<ConversationManager>,
        retriever: Arc<IntegratedRetriever>,
        answer_agent: AnswerGenerationAgent,
        pipeline_timeout_ms: u64,
    ) -> Self {
        Self {
            qua: QueryUnderstanding::new(),
            conversations,
            retriever,
            answer_agent,
            calibrator: ConfidenceCalibrator::new(),
            generation_breaker: CircuitBreaker::new("generation"),
            audit: Arc::new(TracingAuditLogger),
            timeout: Duration::from_millis(pipeline_timeout_ms.max(1)),
        }
    }

    #[must_use]
    pub fn with_audit_logger(mut self, audit: Arc<dyn AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    pub fn conversations(&self) -> &Arc<ConversationManager> {
        &self.conversations
    }

    #[instrument(skip_all, fields(patient_id = %request.patient_id))]
    pub async fn handle_query(&self, request: QueryRequest) -> UiResponse {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut stages: Vec<StageTiming> = Vec::new();

        // Stage 1: query understanding, session checks, follow-up slots.
        let stage_started = Instant::now();
        let understood =
            self.qua
                .understand(&request.query, &request.patient_id, Utc::now());
        let mut sq = match understood {
            Ok(sq) => sq,
            Err(err) => {
                push_stage(&mut stages, "query_understanding", stage_started);
                let response = self.error_response(
                    uuid::Uuid::new_v4().to_string(),
                    &err,
                    stages,
                    started,
                );
                return self.finish(&request, None, None, response);
            }
        };

        if let Some(session_id) = &request.session_id {
            match self.conversations.get_context(session_id) {
                Some(context) => {
                    sq = self.conversations.resolve_follow_up(sq, &context);
                }
                None => {
                    push_stage(&mut stages, "query_understanding", stage_started);
                    let err = AppError::SessionExpired(session_id.clone());
                    let response = self.error_response(
                        sq.query_id.to_string(),
                        &err,
                        stages,
                        started,
                    );
                    return self.finish(&request, Some(&sq), None, response);
                }
            }
        }
        push_stage(&mut stages, "query_understanding", stage_started);

        // Stage 2: partitioned retrieval under the remaining deadline.
        let stage_started = Instant::now();
        let Some(remaining) = remaining_time(deadline) else {
            let response = self.timeout_response(&sq, stages, started);
            return self.finish(&request, Some(&sq), None, response);
        };
        let retrieval_outcome =
            tokio::time::timeout(remaining, self.retriever.parallel_retrieve(&sq)).await;
        push_stage(&mut stages, "retrieval", stage_started);

        let retrieval = match retrieval_outcome {
            Ok(outcome) => outcome.result,
            Err(_) => {
                warn!("Deadline expired during retrieval");
                let response = self.timeout_response(&sq, stages, started);
                return self.finish(&request, Some(&sq), None, response);
            }
        };

        if retrieval.candidates.is_empty() {
            info!("Retrieval returned no candidates; answering with empty evidence");
            let response = self.empty_result_response(&sq, &retrieval, stages, started);
            self.record_turn(&request, &sq, EMPTY_SHORT_ANSWER);
            return self.finish(&request, Some(&sq), Some(&retrieval), response);
        }

        // Stage 3: two-pass generation behind the circuit breaker.
        let stage_started = Instant::now();
        let Some(remaining) = remaining_time(deadline) else {
            let response = self.partial_response(&sq, &retrieval, stages, started);
            return self.finish(&request, Some(&sq), Some(&retrieval), response);
        };
        let generation = tokio::time::timeout(
            remaining,
            self.generation_breaker
                .call(self.answer_agent.generate(&sq, &retrieval)),
        )
        .await;
        push_stage(&mut stages, "generation", stage_started);

        let answer: GeneratedAnswer = match generation {
            Err(_) => {
                warn!("Deadline expired during generation; returning partial results");
                let response = self.partial_response(&sq, &retrieval, stages, started);
                return self.finish(&request, Some(&sq), Some(&retrieval), response);
            }
            Ok(Err(err)) => {
                let response =
                    self.generation_error_response(&sq, &retrieval, &err, stages, started);
                return self.finish(&request, Some(&sq), Some(&retrieval), response);
            }
            Ok(Ok(answer)) => answer,
        };

        // Stage 4: confidence calibration.
        let stage_started = Instant::now();
        let confidence = self
            .calibrator
            .score(&answer.extractions, &retrieval.candidates);
        push_stage(&mut stages, "confidence_scoring", stage_started);

        // Stage 5: provenance formatting.
        let stage_started = Instant::now();
        let provenance = build_provenance(&answer, &retrieval.candidates);
        push_stage(&mut stages, "provenance_formatting", stage_started);

        // Stage 6: response building.
        let stage_started = Instant::now();
        let response = UiResponse {
            query_id: sq.query_id.to_string(),
            success: true,
            short_answer: Some(answer.short_answer.clone()),
            detailed_summary: Some(answer.detailed_summary.clone()),
            structured_extractions: answer.extractions.clone(),
            provenance,
            confidence: Some(ConfidenceSummary {
                score: confidence.aggregate,
                label: confidence.level.confidence_label().to_owned(),
                uncertainty: confidence.level,
                recommendation: confidence.recommendation.clone(),
            }),
            error: None,
            metadata: ResponseMetadata {
                total_time_ms: elapsed_ms(started),
                stages: {
                    push_stage(&mut stages, "response_building", stage_started);
                    stages
                },
                partial: None,
                error: None,
            },
        };

        self.record_turn(&request, &sq, &answer.short_answer);

        // Stage 7: audit logging, after assembly, never affecting the reply.
        self.finish(&request, Some(&sq), Some(&retrieval), response)
    }

    fn record_turn(&self, request: &QueryRequest, sq: &StructuredQuery, summary: &str) {
        if let Some(session_id) = &request.session_id {
            let turn = ConversationTurn {
                query: request.query.clone(),
                structured_query: sq.clone(),
                response_summary: summary.to_owned(),
                timestamp: Utc::now(),
            };
            if let Err(err) = self.conversations.update_context(session_id, turn) {
                warn!(error = %err, "Failed to append conversation turn");
            }
        }
    }

    fn finish(
        &self,
        request: &QueryRequest,
        sq: Option<&StructuredQuery>,
        retrieval: Option<&IntegratedRetrievalResult>,
        response: UiResponse,
    ) -> UiResponse {
        let record = AuditRecord {
            query_id: response.query_id.clone(),
            patient_id: request.patient_id.clone(),
            intent: sq.map(|s| s.intent.to_string()),
            success: response.success,
            error_code: response.error.as_ref().map(|e| e.code.as_str().to_owned()),
            total_time_ms: response.metadata.total_time_ms,
            candidate_count: retrieval.map_or(0, |r| r.candidates.len()),
            extraction_count: response.structured_extractions.len(),
            confidence: response.confidence.as_ref().map(|c| c.score),
        };
        self.audit.log(&record);
        response
    }

    fn error_response(
        &self,
        query_id: String,
        err: &AppError,
        stages: Vec<StageTiming>,
        started: Instant,
    ) -> UiResponse {
        let code = err.code();
        UiResponse {
            query_id,
            success: false,
            short_answer: None,
            detailed_summary: None,
            structured_extractions: Vec::new(),
            provenance: Vec::new(),
            confidence: None,
            error: Some(ErrorBody {
                code,
                message: err.to_string(),
                user_message: user_message(code).to_owned(),
                details: None,
            }),
            metadata: ResponseMetadata {
                total_time_ms: elapsed_ms(started),
                stages,
                partial: None,
                error: Some(code.as_str().to_owned()),
            },
        }
    }

    /// Deadline expired before retrieval finished: a `PIPELINE_TIMEOUT`
    /// error carrying the list of completed stages.
    fn timeout_response(
        &self,
        sq: &StructuredQuery,
        stages: Vec<StageTiming>,
        started: Instant,
    ) -> UiResponse {
        let completed: Vec<String> = stages.iter().map(|s| s.stage.clone()).collect();
        let code = ErrorCode::PipelineTimeout;
        UiResponse {
            query_id: sq.query_id.to_string(),
            success: false,
            short_answer: None,
            detailed_summary: None,
            structured_extractions: Vec::new(),
            provenance: Vec::new(),
            confidence: None,
            error: Some(ErrorBody {
                code,
                message: "pipeline deadline exceeded".to_owned(),
                user_message: user_message(code).to_owned(),
                details: Some(serde_json::json!({ "completed_stages": completed })),
            }),
            metadata: ResponseMetadata {
                total_time_ms: elapsed_ms(started),
                stages,
                partial: None,
                error: Some(code.as_str().to_owned()),
            },
        }
    }

    /// Deadline expired after retrieval completed: surface the top
    /// retrieved records as partial results.
    fn partial_response(
        &self,
        sq: &StructuredQuery,
        retrieval: &IntegratedRetrievalResult,
        stages: Vec<StageTiming>,
        started: Instant,
    ) -> UiResponse {
        let top = &retrieval.candidates[..retrieval.candidates.len().min(PARTIAL_RESULT_COUNT)];
        let now = Utc::now();

        let detailed_summary = top
            .iter()
            .map(|candidate| {
                format!(
                    "- [{}] {}",
                    relative_date(candidate.chunk.occurred_at, now),
                    candidate.snippet.trim()
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let code = ErrorCode::PipelineTimeout;
        UiResponse {
            query_id: sq.query_id.to_string(),
            success: false,
            short_answer: Some(PARTIAL_SHORT_ANSWER.to_owned()),
            detailed_summary: Some(detailed_summary),
            structured_extractions: Vec::new(),
            provenance: candidate_provenance(top, now),
            confidence: Some(low_confidence_summary()),
            error: Some(ErrorBody {
                code,
                message: "generation exceeded the pipeline deadline".to_owned(),
                user_message: user_message(code).to_owned(),
                details: None,
            }),
            metadata: ResponseMetadata {
                total_time_ms: elapsed_ms(started),
                stages,
                partial: Some(true),
                error: Some(code.as_str().to_owned()),
            },
        }
    }

    /// Empty evidence is a successful response with an explanatory answer
    /// and low confidence, never an error.
    fn empty_result_response(
        &self,
        sq: &StructuredQuery,
        retrieval: &IntegratedRetrievalResult,
        mut stages: Vec<StageTiming>,
        started: Instant,
    ) -> UiResponse {
        let stage_started = Instant::now();
        UiResponse {
            query_id: sq.query_id.to_string(),
            success: true,
            short_answer: Some(EMPTY_SHORT_ANSWER.to_owned()),
            detailed_summary: Some(format!(
                "Searched {} records for this patient; none matched the question.",
                retrieval.total_searched
            )),
            structured_extractions: Vec::new(),
            provenance: Vec::new(),
            confidence: Some(low_confidence_summary()),
            error: None,
            metadata: ResponseMetadata {
                total_time_ms: elapsed_ms(started),
                stages: {
                    push_stage(&mut stages, "response_building", stage_started);
                    stages
                },
                partial: None,
                error: None,
            },
        }
    }

    fn generation_error_response(
        &self,
        sq: &StructuredQuery,
        retrieval: &IntegratedRetrievalResult,
        err: &AppError,
        stages: Vec<StageTiming>,
        started: Instant,
    ) -> UiResponse {
        let code = err.code();
        warn!(error = %err, code = %code, "Generation failed");

        if code == ErrorCode::CircuitOpen {
            // RETURN_RETRIEVAL_ONLY fallback: show what retrieval found,
            // clearly marked unavailable for synthesis.
            let now = Utc::now();
            let top =
                &retrieval.candidates[..retrieval.candidates.len().min(PARTIAL_RESULT_COUNT)];
            let detailed_summary = top
                .iter()
                .map(|c| format!("- [{}] {}", relative_date(c.chunk.occurred_at, now), c.snippet))
                .collect::<Vec<_>>()
                .join("\n");

            return UiResponse {
                query_id: sq.query_id.to_string(),
                success: false,
                short_answer: None,
                detailed_summary: Some(detailed_summary),
                structured_extractions: Vec::new(),
                provenance: candidate_provenance(top, now),
                confidence: Some(low_confidence_summary()),
                error: Some(ErrorBody {
                    code,
                    message: err.to_string(),
                    user_message: user_message(code).to_owned(),
                    details: None,
                }),
                metadata: ResponseMetadata {
                    total_time_ms: elapsed_ms(started),
                    stages,
                    partial: Some(true),
                    error: Some(code.as_str().to_owned()),
                },
            };
        }

        // Grounding and output failures never surface fabricated citations.
        self.error_response(sq.query_id.to_string(), err, stages, started)
    }
}

fn low_confidence_summary() -> ConfidenceSummary {
    ConfidenceSummary {
        score: 0.0,
        label: "low".to_owned(),
        uncertainty: generation_pipeline::UncertaintyLevel::VeryHigh,
        recommendation: generation_pipeline::UncertaintyLevel::VeryHigh
            .recommendation()
            .to_owned(),
    }
}

/// Citations for validated extractions: snippet and relative date come
/// from the cited candidate.
fn build_provenance(answer: &GeneratedAnswer, candidates: &[RetrievalCandidate]) -> Vec<ProvenanceEntry> {
    let now = Utc::now();
    answer
        .extractions
        .iter()
        .filter_map(|extraction| {
            let provenance = extraction.provenance();
            candidates
                .iter()
                .find(|c| c.chunk.id == provenance.chunk_id)
                .map(|candidate| ProvenanceEntry {
                    artifact_id: provenance.artifact_id.clone(),
                    chunk_id: provenance.chunk_id.clone(),
                    snippet: if candidate.snippet.is_empty() {
                        provenance.supporting_text.clone()
                    } else {
                        candidate.snippet.clone()
                    },
                    note_date: relative_date(candidate.chunk.occurred_at, now),
                    source_url: candidate.chunk.source.clone(),
                })
        })
        .collect()
}

fn candidate_provenance(candidates: &[RetrievalCandidate], now: chrono::DateTime<Utc>) -> Vec<ProvenanceEntry> {
    candidates
        .iter()
        .map(|candidate| ProvenanceEntry {
            artifact_id: candidate.chunk.artifact_id.clone(),
            chunk_id: candidate.chunk.id.clone(),
            snippet: candidate.snippet.clone(),
            note_date: relative_date(candidate.chunk.occurred_at, now),
            source_url: candidate.chunk.source.clone(),
        })
        .collect()
}

fn push_stage(stages: &mut Vec<StageTiming>, name: &str, started: Instant) {
    stages.push(StageTiming {
        stage: name.to_owned(),
        duration_ms: elapsed_ms(started),
    });
}

fn remaining_time(deadline: Instant) -> Option<Duration> {
    deadline.checked_duration_since(Instant::now())
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
