//! Seams to the generative model.
//!
//! The pipeline only ever talks to [`ChatModel`] and [`Embedder`]; the
//! production implementations wrap [`LlmRouter`], tests substitute fakes.

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use kitabite_config::{AppConfig, LlmProvider};
use kitabite_llm::{LlmError, LlmRouter, LlmSettings, Provider, api_key_from_env};

use crate::error::AuthoringError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyFormat {
    /// Reply must be a single JSON object.
    Json,
    Text,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(&self, system: &str, user: &str, format: ReplyFormat) -> Result<String, LlmError>;
}

/// Text embedding.  `None` means embeddings are unavailable for this text;
/// callers fall back to keyword retrieval.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Option<Vec<f32>>;
}

#[async_trait]
impl ChatModel for LlmRouter {
    async fn chat(&self, system: &str, user: &str, format: ReplyFormat) -> Result<String, LlmError> {
        match format {
            ReplyFormat::Json => self.chat_json(system, user).await,
            ReplyFormat::Text => self.chat_text(system, user).await,
        }
    }
}

#[async_trait]
impl Embedder for LlmRouter {
    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        match LlmRouter::embed(self, text).await {
            Ok(vector) => Some(vector),
            Err(err) => {
                warn!(error = %err, "embedding unavailable");
                None
            }
        }
    }
}

/// Embedder that never produces vectors.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEmbeddings;

#[async_trait]
impl Embedder for NoEmbeddings {
    async fn embed(&self, _text: &str) -> Option<Vec<f32>> {
        None
    }
}

/// Build the model client described by `config`.  Missing credentials for a
/// hosted provider are [`AuthoringError::FatalConfig`].
pub fn router_from_config(config: &AppConfig) -> Result<LlmRouter, AuthoringError> {
    let provider = match config.llm.provider {
        LlmProvider::OpenRouter => Provider::OpenRouter,
        LlmProvider::Ollama => Provider::Ollama,
    };
    LlmRouter::new(LlmSettings {
        provider,
        chat_model: config.llm.chat_model.clone(),
        embed_model: config.llm.embed_model.clone(),
        ollama_base_url: config.llm.ollama_base_url.clone(),
        openai_base_url: config.llm.openai_base_url.clone(),
        api_key: api_key_from_env(),
        timeout: Duration::from_secs(config.llm.request_timeout_secs.max(1)),
    })
    .map_err(|err| AuthoringError::FatalConfig {
        reason: err.to_string(),
    })
}
