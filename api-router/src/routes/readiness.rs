use axum::{extract::State, http::StatusCode};
use tracing::warn;

use crate::api_state::ApiState;

/// Readiness probe: the service is ready once the metadata store answers.
pub async fn ready(State(state): State<ApiState>) -> StatusCode {
    match state.db.query("RETURN 1;").await {
        Ok(_) => StatusCode::OK,
        Err(err) => {
            warn!(error = %err, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
