use std::sync::Arc;
use std::time::Duration;

use api_router::{api_routes_v1, api_state::ApiState};
use axum::Router;
use common::{
    storage::db::SurrealDbClient,
    utils::{
        cache::CacheManager,
        config::get_config,
        embedding::EmbeddingProvider,
    },
};
use generation_pipeline::{AnswerGenerationAgent, LlmProvider, TwoPassGenerator};
use ingestion_pipeline::IngestionPipeline;
use orchestrator::Orchestrator;
use query_understanding::ConversationManager;
use retrieval_pipeline::{IntegratedRetriever, RetrievalCache, RetrieverConfig};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SESSION_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Get config
    let config = get_config()?;

    // Generation backend resolution fails fast before anything else spins up.
    let llm = Arc::new(LlmProvider::from_config(&config)?);
    info!(backend = llm.backend_label(), "Generation backend selected");

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );
    db.ensure_initialized(config.embedding_dimensions).await?;

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(config.openai_api_key.clone().unwrap_or_default())
            .with_api_base(&config.openai_base_url),
    ));

    let caches = Arc::new(CacheManager::new(
        config.embedding_cache_capacity,
        Duration::from_secs(config.embedding_cache_ttl_seconds),
    ));
    let embedding_provider = Arc::new(
        EmbeddingProvider::from_config(&config, Some(openai_client))?
            .with_cache(Arc::clone(&caches)),
    );
    info!(
        embedding_backend = embedding_provider.backend_label(),
        embedding_dimension = embedding_provider.dimension(),
        "Embedding provider initialized"
    );

    let retrieval_cache = Arc::new(RetrievalCache::new(config.cache_ttl_seconds));
    let retriever = Arc::new(
        IntegratedRetriever::new(
            Arc::clone(&db),
            Arc::clone(&embedding_provider),
            RetrieverConfig::default(),
        )
        .with_cache(retrieval_cache),
    );
    let ingestion = Arc::new(IngestionPipeline::new(
        Arc::clone(&db),
        embedding_provider,
    ));

    let answer_agent = AnswerGenerationAgent::new(TwoPassGenerator::new(llm));
    let conversations = Arc::new(ConversationManager::new(
        config.context_window_turns,
        config.session_expiry_ms,
    ));

    // Periodic session cleanup; idempotent, so the interval is forgiving.
    let cleanup_conversations = Arc::clone(&conversations);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SESSION_CLEANUP_INTERVAL);
        loop {
            ticker.tick().await;
            cleanup_conversations.cleanup_expired_sessions();
        }
    });

    let orchestrator = Arc::new(Orchestrator::new(
        conversations,
        retriever,
        answer_agent,
        config.pipeline_timeout_ms,
    ));

    let api_state = ApiState::new(orchestrator, ingestion, db, config.clone());
    let app: Router = api_routes_v1(&api_state)
        .layer(TraceLayer::new_for_http())
        .with_state(api_state);

    let serve_address = format!("0.0.0.0:{}", config.http_port);
    info!("Starting server listening on {serve_address}");
    let listener = tokio::net::TcpListener::bind(serve_address).await?;

    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {e}");
    }

    Ok(())
}
