use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::error::AppError;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    Openai,
    /// Deterministic hashed bag-of-words vectors; used in tests and
    /// air-gapped deployments.
    Hashed,
}

/// Which chat-completion backend generation talks to. Exactly one is
/// active; resolution fails fast when neither is configured.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GeneratorBackend {
    OpenAi { api_key: String, base_url: String },
    Ollama { base_url: String },
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    pub http_port: u16,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub ollama_base_url: Option<String>,
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_generation_model")]
    pub generation_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,
    #[serde(default = "default_embedding_backend")]
    pub embedding_backend: EmbeddingBackend,
    #[serde(default = "default_max_embedding_batch_size")]
    pub max_embedding_batch_size: usize,
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
    #[serde(default = "default_embedding_cache_ttl_seconds")]
    pub embedding_cache_ttl_seconds: u64,
    #[serde(default = "default_embedding_cache_capacity")]
    pub embedding_cache_capacity: usize,
    #[serde(default = "default_pipeline_timeout_ms")]
    pub pipeline_timeout_ms: u64,
    #[serde(default = "default_rate_limit_window_ms")]
    pub rate_limit_window_ms: u64,
    #[serde(default = "default_rate_limit_max_requests")]
    pub rate_limit_max_requests: u32,
    #[serde(default = "default_context_window_turns")]
    pub context_window_turns: usize,
    #[serde(default = "default_session_expiry_ms")]
    pub session_expiry_ms: u64,
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_owned()
}

fn default_generation_model() -> String {
    "gpt-4o-mini".to_owned()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_owned()
}

const fn default_embedding_dimensions() -> usize {
    1536
}

const fn default_embedding_backend() -> EmbeddingBackend {
    EmbeddingBackend::Openai
}

const fn default_max_embedding_batch_size() -> usize {
    64
}

const fn default_cache_ttl_seconds() -> u64 {
    300
}

const fn default_embedding_cache_ttl_seconds() -> u64 {
    86_400
}

const fn default_embedding_cache_capacity() -> usize {
    1000
}

const fn default_pipeline_timeout_ms() -> u64 {
    6000
}

const fn default_rate_limit_window_ms() -> u64 {
    60_000
}

const fn default_rate_limit_max_requests() -> u32 {
    60
}

const fn default_context_window_turns() -> usize {
    5
}

const fn default_session_expiry_ms() -> u64 {
    1_800_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            surrealdb_address: "mem://".to_owned(),
            surrealdb_username: "root".to_owned(),
            surrealdb_password: "root".to_owned(),
            surrealdb_namespace: "records_qa".to_owned(),
            surrealdb_database: "records_qa".to_owned(),
            http_port: 3000,
            openai_api_key: None,
            ollama_base_url: None,
            openai_base_url: default_openai_base_url(),
            generation_model: default_generation_model(),
            embedding_model: default_embedding_model(),
            embedding_dimensions: default_embedding_dimensions(),
            embedding_backend: default_embedding_backend(),
            max_embedding_batch_size: default_max_embedding_batch_size(),
            cache_ttl_seconds: default_cache_ttl_seconds(),
            embedding_cache_ttl_seconds: default_embedding_cache_ttl_seconds(),
            embedding_cache_capacity: default_embedding_cache_capacity(),
            pipeline_timeout_ms: default_pipeline_timeout_ms(),
            rate_limit_window_ms: default_rate_limit_window_ms(),
            rate_limit_max_requests: default_rate_limit_max_requests(),
            context_window_turns: default_context_window_turns(),
            session_expiry_ms: default_session_expiry_ms(),
        }
    }
}

impl AppConfig {
    /// Resolves the generation backend. `openai_api_key` wins when both are
    /// set; neither set is a startup error.
    pub fn generator_backend(&self) -> Result<GeneratorBackend, AppError> {
        if let Some(key) = self
            .openai_api_key
            .as_ref()
            .filter(|k| !k.trim().is_empty())
        {
            return Ok(GeneratorBackend::OpenAi {
                api_key: key.clone(),
                base_url: self.openai_base_url.clone(),
            });
        }

        if let Some(base_url) = self
            .ollama_base_url
            .as_ref()
            .filter(|u| !u.trim().is_empty())
        {
            return Ok(GeneratorBackend::Ollama {
                base_url: base_url.clone(),
            });
        }

        Err(AppError::Validation(
            "no generation backend configured: set OPENAI_API_KEY or OLLAMA_BASE_URL".to_owned(),
        ))
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_selection_prefers_openai() {
        let config = AppConfig {
            openai_api_key: Some("sk-test".into()),
            ollama_base_url: Some("http://localhost:11434/v1".into()),
            ..Default::default()
        };
        assert!(matches!(
            config.generator_backend(),
            Ok(GeneratorBackend::OpenAi { .. })
        ));
    }

    #[test]
    fn backend_selection_falls_back_to_ollama() {
        let config = AppConfig {
            ollama_base_url: Some("http://localhost:11434/v1".into()),
            ..Default::default()
        };
        assert!(matches!(
            config.generator_backend(),
            Ok(GeneratorBackend::Ollama { .. })
        ));
    }

    #[test]
    fn missing_backend_fails_fast() {
        let config = AppConfig::default();
        assert!(config.generator_backend().is_err());
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.pipeline_timeout_ms, 6000);
        assert_eq!(config.cache_ttl_seconds, 300);
        assert_eq!(config.session_expiry_ms, 1_800_000);
        assert_eq!(config.context_window_turns, 5);
        assert_eq!(config.embedding_cache_capacity, 1000);
    }
}
