use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_openai::types::CreateEmbeddingRequestArgs;
use tracing::debug;

use crate::{
    error::AppError,
    utils::{
        cache::CacheManager,
        config::{AppConfig, EmbeddingBackend},
    },
};

enum Backend {
    OpenAi {
        client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
        model: String,
    },
    Hashed,
}

/// Sentence/chunk embedding producer. Only the embed / batch-embed contract
/// is consumed here; the model serving it is an external concern.
///
/// The hashed backend produces deterministic bag-of-words vectors and
/// exists so retrieval is testable without network access.
pub struct EmbeddingProvider {
    backend: Backend,
    dimensions: usize,
    batch_cap: usize,
    cache: Option<Arc<CacheManager>>,
}

impl EmbeddingProvider {
    pub fn from_config(
        config: &AppConfig,
        openai_client: Option<Arc<async_openai::Client<async_openai::config::OpenAIConfig>>>,
    ) -> Result<Self, AppError> {
        let backend = match config.embedding_backend {
            EmbeddingBackend::Openai => {
                let client = openai_client.ok_or_else(|| {
                    AppError::Validation(
                        "openai embedding backend requires a configured client".to_owned(),
                    )
                })?;
                Backend::OpenAi {
                    client,
                    model: config.embedding_model.clone(),
                }
            }
            EmbeddingBackend::Hashed => Backend::Hashed,
        };

        Ok(Self {
            backend,
            dimensions: config.embedding_dimensions,
            batch_cap: config.max_embedding_batch_size.max(1),
            cache: None,
        })
    }

    pub fn new_hashed(dimensions: usize) -> Result<Self, AppError> {
        if dimensions == 0 {
            return Err(AppError::Validation(
                "embedding dimensions must be positive".to_owned(),
            ));
        }
        Ok(Self {
            backend: Backend::Hashed,
            dimensions,
            batch_cap: 64,
            cache: None,
        })
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<CacheManager>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub const fn dimension(&self) -> usize {
        self.dimensions
    }

    pub const fn backend_label(&self) -> &'static str {
        match self.backend {
            Backend::OpenAi { .. } => "openai",
            Backend::Hashed => "hashed",
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        if let Some(cache) = self.cache.as_deref() {
            let key = CacheManager::embedding_key(text);
            if let Some(hit) = cache.embeddings.get(&key) {
                debug!("Embedding cache hit");
                return Ok(hit);
            }
        }

        let embedding = match &self.backend {
            Backend::OpenAi { client, model } => {
                let inputs = [text.to_owned()];
                self.embed_openai(client, model, &inputs)
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| {
                        AppError::InternalError("No embedding data received".to_owned())
                    })?
            }
            Backend::Hashed => hashed_embedding(text, self.dimensions),
        };

        if let Some(cache) = self.cache.as_deref() {
            cache
                .embeddings
                .insert(CacheManager::embedding_key(text), embedding.clone());
        }

        Ok(embedding)
    }

    /// Batch embedding, chunked by `max_embedding_batch_size`. Order of the
    /// returned vectors matches the input order.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        let mut results = Vec::with_capacity(texts.len());

        for window in texts.chunks(self.batch_cap) {
            match &self.backend {
                Backend::OpenAi { client, model } => {
                    results.extend(self.embed_openai(client, model, window).await?);
                }
                Backend::Hashed => {
                    results.extend(window.iter().map(|t| hashed_embedding(t, self.dimensions)));
                }
            }
        }

        Ok(results)
    }

    async fn embed_openai(
        &self,
        client: &async_openai::Client<async_openai::config::OpenAIConfig>,
        model: &str,
        inputs: &[String],
    ) -> Result<Vec<Vec<f32>>, AppError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(model)
            .dimensions(u32::try_from(self.dimensions).unwrap_or(u32::MAX))
            .input(inputs.to_vec())
            .build()?;

        let response = client.embeddings().create(request).await?;

        if response.data.len() != inputs.len() {
            return Err(AppError::InternalError(format!(
                "embedding response count {} does not match input count {}",
                response.data.len(),
                inputs.len()
            )));
        }

        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Deterministic token-bucket embedding, L2-normalized.
fn hashed_embedding(text: &str, dimensions: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimensions];

    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let mut hasher = DefaultHasher::new();
        token.to_ascii_lowercase().hash(&mut hasher);
        let bucket = (hasher.finish() % dimensions as u64) as usize;
        vector[bucket] += 1.0;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }

    vector
}
