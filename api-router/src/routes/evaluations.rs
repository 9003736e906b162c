use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use common::storage::types::evaluation::{Evaluation, EvaluationQuery};
use serde::{Deserialize, Serialize};

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct CreateEvaluationBody {
    pub query_id: String,
    pub evaluator: String,
    pub rating: u8,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EvaluationCreated {
    pub evaluation_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct EvaluationList {
    pub evaluations: Vec<Evaluation>,
    pub count: usize,
}

/// `POST /evaluations` — record a human rating of one answered query.
pub async fn create_evaluation(
    State(state): State<ApiState>,
    Json(body): Json<CreateEvaluationBody>,
) -> Result<impl IntoResponse, ApiError> {
    let evaluation = Evaluation::new(body.query_id, body.evaluator, body.rating, body.comment);
    evaluation.validate()?;

    let evaluation_id = evaluation.id.clone();
    let timestamp = evaluation.created_at;
    state.db.store_item(evaluation).await.map_err(|e| {
        ApiError::from(common::error::AppError::Database(e))
    })?;

    Ok((
        StatusCode::CREATED,
        Json(EvaluationCreated {
            evaluation_id,
            timestamp,
        }),
    ))
}

/// `GET /evaluations?query_id=&evaluator=&min_rating=&limit=&offset=`
pub async fn list_evaluations(
    State(state): State<ApiState>,
    Query(filters): Query<EvaluationQuery>,
) -> Result<Json<EvaluationList>, ApiError> {
    let evaluations = Evaluation::list(&filters, &state.db).await?;
    let count = evaluations.len();

    Ok(Json(EvaluationList { evaluations, count }))
}
