use api_state::ApiState;
use axum::{
    extract::FromRef,
    routing::{get, post},
    Router,
};
use routes::{
    artifacts::ingest_artifact,
    evaluations::{create_evaluation, list_evaluations},
    liveness::live,
    query::post_query,
    readiness::ready,
    sessions::{create_session, delete_session, get_session},
};

pub mod api_state;
pub mod error;
mod routes;

/// REST surface, version 1. Auth middleware and rate limiting are external
/// collaborators layered in front of this router by the deployment.
pub fn api_routes_v1<S>(_app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Public, unauthenticated endpoints (for k8s/systemd probes)
    let public = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live));

    let core = Router::new()
        .route("/query", post(post_query))
        .route("/artifacts", post(ingest_artifact))
        .route("/sessions", post(create_session))
        .route("/sessions/{id}", get(get_session).delete(delete_session))
        .route("/evaluations", post(create_evaluation).get(list_evaluations));

    public.merge(core)
}
