use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use orchestrator::{QueryRequest, Response as UiResponse};
use serde::Deserialize;

use crate::{api_state::ApiState, error::status_for};

#[derive(Debug, Deserialize)]
pub struct QueryBody {
    pub query: String,
    pub patient_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// `POST /query` — the full pipeline. The HTTP status follows the error
/// code embedded in the response; successful and empty-evidence responses
/// are 200.
pub async fn post_query(
    State(state): State<ApiState>,
    Json(body): Json<QueryBody>,
) -> impl IntoResponse {
    let response: UiResponse = state
        .orchestrator
        .handle_query(QueryRequest {
            query: body.query,
            patient_id: body.patient_id,
            session_id: body.session_id,
        })
        .await;

    let status = response
        .error
        .as_ref()
        .map_or(StatusCode::OK, |e| status_for(e.code));

    (status, Json(response))
}
