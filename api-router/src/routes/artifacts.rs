use std::collections::HashMap;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use common::storage::types::artifact::{Artifact, ArtifactType};
use serde::{Deserialize, Serialize};

use crate::{api_state::ApiState, error::ApiError};

/// A normalized EMR record as the upstream normalizer delivers it.
#[derive(Debug, Deserialize)]
pub struct IngestArtifactBody {
    pub patient_id: String,
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,
    pub occurred_at: DateTime<Utc>,
    pub text: String,
    pub source: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct ArtifactIngested {
    pub artifact_id: String,
    pub chunks_stored: usize,
    pub sentences_stored: usize,
    pub warnings: Vec<String>,
}

/// `POST /artifacts` — ingest one canonical artifact: validate, chunk,
/// embed, store.
pub async fn ingest_artifact(
    State(state): State<ApiState>,
    Json(body): Json<IngestArtifactBody>,
) -> Result<impl IntoResponse, ApiError> {
    let artifact = Artifact::new(
        body.patient_id,
        body.artifact_type,
        body.occurred_at,
        body.text,
        body.source,
        body.author,
        body.title,
        body.meta,
    );

    let report = state.ingestion.ingest_artifact(&artifact).await?;

    Ok((
        StatusCode::CREATED,
        Json(ArtifactIngested {
            artifact_id: report.artifact_id,
            chunks_stored: report.chunks_stored,
            sentences_stored: report.sentences_stored,
            warnings: report.warnings,
        }),
    ))
}
