use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_openai::types::{
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequestArgs,
};
use common::{
    error::AppError,
    utils::config::{AppConfig, GeneratorBackend},
};
use tracing::debug;

/// One chat-completion call. `max_tokens` caps the reply length;
/// temperature is fixed per pass by the prompt builder.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: String,
    pub total_tokens: u32,
}

/// A canned reply for the scripted test backend.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Content(String),
    /// Simulates a transient upstream failure (timeout-class).
    TransientFailure(String),
}

enum Backend {
    OpenAi {
        client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
        model: String,
    },
    /// Deterministic replies with optional per-reply latency; exists so the
    /// two-pass generator is testable without network access.
    Scripted {
        replies: Mutex<VecDeque<(Duration, ScriptedReply)>>,
    },
}

/// Chat-completion backend. Either an OpenAI-compatible endpoint (OpenAI
/// proper or Ollama via base-url override) or a scripted transcript.
pub struct LlmProvider {
    backend: Backend,
}

impl LlmProvider {
    /// Fails fast when neither `OPENAI_API_KEY` nor `OLLAMA_BASE_URL` is
    /// configured.
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let backend = match config.generator_backend()? {
            GeneratorBackend::OpenAi { api_key, base_url } => Backend::OpenAi {
                client: Arc::new(async_openai::Client::with_config(
                    async_openai::config::OpenAIConfig::new()
                        .with_api_key(api_key)
                        .with_api_base(base_url),
                )),
                model: config.generation_model.clone(),
            },
            GeneratorBackend::Ollama { base_url } => Backend::OpenAi {
                client: Arc::new(async_openai::Client::with_config(
                    async_openai::config::OpenAIConfig::new()
                        .with_api_key("ollama")
                        .with_api_base(base_url),
                )),
                model: config.generation_model.clone(),
            },
        };

        Ok(Self { backend })
    }

    pub fn scripted(replies: Vec<ScriptedReply>) -> Self {
        Self::scripted_with_latency(replies.into_iter().map(|r| (Duration::ZERO, r)).collect())
    }

    pub fn scripted_with_latency(replies: Vec<(Duration, ScriptedReply)>) -> Self {
        Self {
            backend: Backend::Scripted {
                replies: Mutex::new(replies.into()),
            },
        }
    }

    pub const fn backend_label(&self) -> &'static str {
        match self.backend {
            Backend::OpenAi { .. } => "openai",
            Backend::Scripted { .. } => "scripted",
        }
    }

    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatOutcome, AppError> {
        match &self.backend {
            Backend::OpenAi { client, model } => {
                let chat_request = CreateChatCompletionRequestArgs::default()
                    .model(model)
                    .temperature(request.temperature)
                    .max_tokens(request.max_tokens)
                    .messages([
                        ChatCompletionRequestSystemMessage::from(request.system.clone()).into(),
                        ChatCompletionRequestUserMessage::from(request.user.clone()).into(),
                    ])
                    .build()?;

                let response = client.chat().create(chat_request).await?;

                let content = response
                    .choices
                    .first()
                    .and_then(|choice| choice.message.content.clone())
                    .ok_or_else(|| {
                        AppError::GenerationInvalidOutput(
                            "no content in chat completion response".to_owned(),
                        )
                    })?;
                let total_tokens = response.usage.map_or_else(
                    || estimate_tokens(&content),
                    |usage| usage.total_tokens,
                );

                debug!(total_tokens, "Chat completion received");
                Ok(ChatOutcome {
                    content,
                    total_tokens,
                })
            }
            Backend::Scripted { replies } => {
                let next = {
                    let mut queue = match replies.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    queue.pop_front()
                };

                let Some((delay, reply)) = next else {
                    return Err(AppError::InternalError(
                        "scripted llm transcript exhausted".to_owned(),
                    ));
                };

                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }

                match reply {
                    ScriptedReply::Content(content) => {
                        let total_tokens = estimate_tokens(&content);
                        Ok(ChatOutcome {
                            content,
                            total_tokens,
                        })
                    }
                    ScriptedReply::TransientFailure(message) => Err(AppError::LlmTimeout(message)),
                }
            }
        }
    }
}

/// Rough chars/4 token estimate, used when the backend reports no usage.
fn estimate_tokens(text: &str) -> u32 {
    u32::try_from(text.chars().count() / 4).unwrap_or(u32::MAX).max(1)
}
