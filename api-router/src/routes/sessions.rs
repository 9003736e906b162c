use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use query_understanding::ConversationContext;
use serde::{Deserialize, Serialize};

use crate::{api_state::ApiState, error::ApiError};
use common::error::ErrorCode;

#[derive(Debug, Deserialize)]
pub struct CreateSessionBody {
    pub patient_id: String,
}

#[derive(Debug, Serialize)]
pub struct SessionCreated {
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Read-only snapshot of a live session.
#[derive(Debug, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub patient_id: String,
    pub turn_count: usize,
    pub turns: Vec<TurnSnapshot>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct TurnSnapshot {
    pub query: String,
    pub response_summary: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&ConversationContext> for SessionSnapshot {
    fn from(context: &ConversationContext) -> Self {
        Self {
            session_id: context.session_id.clone(),
            patient_id: context.patient_id.clone(),
            turn_count: context.turns.len(),
            turns: context
                .turns
                .iter()
                .map(|turn| TurnSnapshot {
                    query: turn.query.clone(),
                    response_summary: turn.response_summary.clone(),
                    timestamp: turn.timestamp,
                })
                .collect(),
            created_at: context.created_at,
            expires_at: context.expires_at,
        }
    }
}

/// `POST /sessions` — open a conversation window for a patient.
pub async fn create_session(
    State(state): State<ApiState>,
    Json(body): Json<CreateSessionBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.patient_id.trim().is_empty() {
        return Err(ApiError::new(
            ErrorCode::InvalidQuery,
            "patient_id must be non-empty",
        ));
    }

    let context = state.conversations().create_session(&body.patient_id);

    Ok((
        StatusCode::CREATED,
        Json(SessionCreated {
            session_id: context.session_id.clone(),
            expires_at: context.expires_at,
        }),
    ))
}

/// `GET /sessions/{id}` — context snapshot, or 404 once expired.
pub async fn get_session(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionSnapshot>, StatusCode> {
    state
        .conversations()
        .get_context(&session_id)
        .map(|context| Json(SessionSnapshot::from(context.as_ref())))
        .ok_or(StatusCode::NOT_FOUND)
}

/// `DELETE /sessions/{id}` — explicit teardown before expiry.
pub async fn delete_session(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> StatusCode {
    if state.conversations().delete_session(&session_id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}
