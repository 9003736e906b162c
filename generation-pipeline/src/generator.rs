use std::sync::Arc;
use std::time::Instant;

use common::{
    error::AppError,
    utils::retry::{retry_transient, RetryPolicy},
};
use query_understanding::{detail, StructuredQuery};
use retrieval_pipeline::RetrievalCandidate;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::{
    extraction::Extraction,
    llm::LlmProvider,
    prompt::PromptBuilder,
};

#[derive(Debug, Deserialize)]
struct ExtractionEnvelope {
    extractions: Vec<Extraction>,
}

#[derive(Debug, Deserialize)]
struct SummaryEnvelope {
    short_answer: String,
    detailed_summary: String,
}

/// Result of both generation passes with token and timing accounting.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub extractions: Vec<Extraction>,
    pub short_answer: String,
    pub detailed_summary: String,
    pub pass1_tokens: u32,
    pub pass2_tokens: u32,
    pub total_tokens: u32,
    pub execution_time_ms: u64,
}

/// Two-pass grounded generation: a cold extraction pass producing
/// structured claims, then a warm summarization pass wording the answer to
/// the query's detail level. Transient LLM errors retry with backoff; the
/// orchestrator's deadline bounds the whole call from outside.
pub struct TwoPassGenerator {
    llm: Arc<LlmProvider>,
    prompts: PromptBuilder,
    retry: RetryPolicy,
}

impl TwoPassGenerator {
    pub fn new(llm: Arc<LlmProvider>) -> Self {
        Self {
            llm,
            prompts: PromptBuilder::new(),
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[instrument(skip_all, fields(query_id = %query.query_id))]
    pub async fn generate(
        &self,
        query: &StructuredQuery,
        candidates: &[RetrievalCandidate],
    ) -> Result<GenerationOutcome, AppError> {
        let started = Instant::now();

        // Pass 1: extraction, temperature 0.
        let extraction_request = self.prompts.extraction_request(query, candidates);
        let pass1 = retry_transient(self.retry, "extraction_pass", || {
            self.llm.chat(&extraction_request)
        })
        .await?;

        let envelope: ExtractionEnvelope = parse_json_reply(&pass1.content)?;
        debug!(
            extractions = envelope.extractions.len(),
            pass1_tokens = pass1.total_tokens,
            "Extraction pass complete"
        );

        // Pass 2: summarization, temperature 0.3, shaped by detail level.
        let guidelines = detail::guidelines(query.detail_level);
        let summary_request =
            self.prompts
                .summarization_request(query, &envelope.extractions, &guidelines);
        let pass2 = retry_transient(self.retry, "summarization_pass", || {
            self.llm.chat(&summary_request)
        })
        .await?;

        let summary: SummaryEnvelope = parse_json_reply(&pass2.content)?;

        Ok(GenerationOutcome {
            extractions: envelope.extractions,
            short_answer: summary.short_answer,
            detailed_summary: summary.detailed_summary,
            pass1_tokens: pass1.total_tokens,
            pass2_tokens: pass2.total_tokens,
            total_tokens: pass1.total_tokens + pass2.total_tokens,
            execution_time_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }
}

/// Parses a JSON reply, tolerating markdown code fences. Anything that
/// fails to parse or misses required fields is `GENERATION_INVALID_OUTPUT`.
fn parse_json_reply<T: for<'de> Deserialize<'de>>(content: &str) -> Result<T, AppError> {
    let stripped = strip_code_fences(content);
    serde_json::from_str(stripped)
        .map_err(|e| AppError::GenerationInvalidOutput(format!("malformed model output: {e}")))
}

fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag after the opening fence.
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches(['\r', '\n']);
    rest.strip_suffix("```").map_or(rest, str::trim).trim()
}
