use std::sync::Arc;

use common::{storage::db::SurrealDbClient, utils::config::AppConfig};
use ingestion_pipeline::IngestionPipeline;
use orchestrator::Orchestrator;
use query_understanding::ConversationManager;

/// Shared state for the REST surface. Everything is constructed once at
/// startup and cloned per request.
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub ingestion: Arc<IngestionPipeline>,
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
}

impl ApiState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        ingestion: Arc<IngestionPipeline>,
        db: Arc<SurrealDbClient>,
        config: AppConfig,
    ) -> Self {
        Self {
            orchestrator,
            ingestion,
            db,
            config,
        }
    }

    pub fn conversations(&self) -> &Arc<ConversationManager> {
        self.orchestrator.conversations()
    }
}
