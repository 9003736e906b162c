use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::{AppError, ErrorCode};
use serde::Serialize;
use thiserror::Error;

/// HTTP-facing error with the stable wire code attached.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        let code = err.code();
        let message = match code {
            // Internal details stay out of the response body.
            ErrorCode::Internal => {
                tracing::error!(error = %err, "Internal error");
                "Internal server error".to_owned()
            }
            _ => err.to_string(),
        };
        Self { code, message }
    }
}

/// The stable code-to-status mapping of the error taxonomy.
pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::InvalidQuery => StatusCode::BAD_REQUEST,
        ErrorCode::SessionExpired => StatusCode::GONE,
        ErrorCode::PatientNotFound => StatusCode::NOT_FOUND,
        ErrorCode::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
        // An empty result is a successful response with empty evidence.
        ErrorCode::RetrievalEmpty => StatusCode::OK,
        ErrorCode::GenerationInvalidOutput | ErrorCode::GenerationProvenanceInvalid => {
            StatusCode::BAD_GATEWAY
        }
        ErrorCode::LlmTimeout | ErrorCode::PipelineTimeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorCode::CircuitOpen => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    code: &'static str,
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.code);
        let body = ErrorResponse {
            code: self.code.as_str(),
            error: self.message,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_documented_statuses() {
        assert_eq!(status_for(ErrorCode::InvalidQuery), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorCode::SessionExpired), StatusCode::GONE);
        assert_eq!(status_for(ErrorCode::PatientNotFound), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(ErrorCode::RateLimitExceeded),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(status_for(ErrorCode::RetrievalEmpty), StatusCode::OK);
        assert_eq!(
            status_for(ErrorCode::GenerationProvenanceInvalid),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(ErrorCode::PipelineTimeout),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_for(ErrorCode::CircuitOpen),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(ErrorCode::Internal),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_errors_are_sanitized() {
        let err = AppError::InternalError("db password incorrect".into());
        let api_error = ApiError::from(err);
        assert_eq!(api_error.message, "Internal server error");
        assert_eq!(api_error.code, ErrorCode::Internal);
    }

    #[test]
    fn session_expired_keeps_its_message() {
        let err = AppError::SessionExpired("session_1".into());
        let api_error = ApiError::from(err);
        assert!(api_error.message.contains("session_1"));
    }
}
