use async_openai::error::OpenAIError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    #[error("Session expired: {0}")]
    SessionExpired(String),
    #[error("Patient not found: {0}")]
    PatientNotFound(String),
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("Generation produced invalid output: {0}")]
    GenerationInvalidOutput(String),
    #[error("Generation provenance invalid: {0}")]
    GenerationProvenanceInvalid(String),
    #[error("LLM call timed out: {0}")]
    LlmTimeout(String),
    #[error("Pipeline deadline exceeded: {0}")]
    PipelineTimeout(String),
    #[error("Circuit breaker open for {0}")]
    CircuitOpen(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

/// Stable wire-level error codes. The HTTP mapping lives in `api-router`;
/// everything below HTTP reasons about errors through these codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidQuery,
    SessionExpired,
    PatientNotFound,
    RateLimitExceeded,
    RetrievalEmpty,
    GenerationInvalidOutput,
    GenerationProvenanceInvalid,
    LlmTimeout,
    PipelineTimeout,
    CircuitOpen,
    Internal,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidQuery => "INVALID_QUERY",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::PatientNotFound => "PATIENT_NOT_FOUND",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::RetrievalEmpty => "RETRIEVAL_EMPTY",
            Self::GenerationInvalidOutput => "GENERATION_INVALID_OUTPUT",
            Self::GenerationProvenanceInvalid => "GENERATION_PROVENANCE_INVALID",
            Self::LlmTimeout => "LLM_TIMEOUT",
            Self::PipelineTimeout => "PIPELINE_TIMEOUT",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AppError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidQuery(_) | Self::Validation(_) => ErrorCode::InvalidQuery,
            Self::SessionExpired(_) => ErrorCode::SessionExpired,
            Self::PatientNotFound(_) => ErrorCode::PatientNotFound,
            Self::RateLimited(_) => ErrorCode::RateLimitExceeded,
            Self::GenerationInvalidOutput(_) => ErrorCode::GenerationInvalidOutput,
            Self::GenerationProvenanceInvalid(_) => ErrorCode::GenerationProvenanceInvalid,
            Self::LlmTimeout(_) => ErrorCode::LlmTimeout,
            Self::PipelineTimeout(_) => ErrorCode::PipelineTimeout,
            Self::CircuitOpen(_) => ErrorCode::CircuitOpen,
            _ => ErrorCode::Internal,
        }
    }

    /// Whether a retry with backoff is worth attempting.
    ///
    /// Connection resets, timeouts, rate limits and 5xx-class upstream
    /// failures qualify; input and grounding errors never do.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::LlmTimeout(_) | Self::RateLimited(_) => true,
            Self::OpenAI(err) => matches!(
                err,
                OpenAIError::Reqwest(_) | OpenAIError::StreamError(_)
            ),
            Self::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}
