use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("no API key for {provider}: set OPENROUTER_API_KEY or OPENAI_API_KEY, or switch provider to ollama")]
    MissingCredentials { provider: &'static str },

    #[error("{provider} request failed: {source}")]
    Transport {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} error ({status}): {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{provider} response missing {what}: {body}")]
    Malformed {
        provider: &'static str,
        what: &'static str,
        body: String,
    },
}

impl LlmError {
    /// Errors that will recur on every request: retrying the next lesson is
    /// pointless.
    pub fn is_fatal(&self) -> bool {
        match self {
            LlmError::MissingCredentials { .. } => true,
            LlmError::Status { status, .. } => matches!(status, 401 | 403),
            _ => false,
        }
    }
}

pub type LlmResult<T> = Result<T, LlmError>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Ollama,
    OpenRouter,
}

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Provider::Ollama => "ollama",
            Provider::OpenRouter => "openrouter",
        }
    }
}

/// First non-empty key among `OPENROUTER_API_KEY` and `OPENAI_API_KEY`.
pub fn api_key_from_env() -> Option<String> {
    ["OPENROUTER_API_KEY", "OPENAI_API_KEY"]
        .into_iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|key| key.trim().to_string())
        .find(|key| !key.is_empty())
}

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

async fn post_json(
    provider: &'static str,
    request: reqwest::RequestBuilder,
    payload: &Value,
) -> LlmResult<Value> {
    let response = request
        .json(payload)
        .send()
        .await
        .map_err(|source| LlmError::Transport { provider, source })?;
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|source| LlmError::Transport { provider, source })?;
    if !status.is_success() {
        return Err(LlmError::Status {
            provider,
            status: status.as_u16(),
            body: text,
        });
    }
    serde_json::from_str(&text).map_err(|_| LlmError::Malformed {
        provider,
        what: "JSON body",
        body: text,
    })
}

fn embedding_from(values: Option<&Value>) -> Option<Vec<f32>> {
    let vector: Vec<f32> = values?
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect::<Option<_>>()?;
    (!vector.is_empty()).then_some(vector)
}

// ── Ollama ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn chat(&self, model: &str, system: &str, user: &str, json_mode: bool) -> LlmResult<String> {
        let mut payload = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ],
            "stream": false
        });
        if json_mode {
            payload["format"] = json!("json");
        }
        let endpoint = format!("{}/api/chat", self.base_url);
        let body = post_json("ollama", self.client.post(endpoint), &payload).await?;
        parse_ollama_chat(&body).ok_or_else(|| LlmError::Malformed {
            provider: "ollama",
            what: "message content",
            body: body.to_string(),
        })
    }

    pub async fn embed(&self, model: &str, text: &str) -> LlmResult<Vec<f32>> {
        let payload = json!({ "model": model, "prompt": text });
        let endpoint = format!("{}/api/embeddings", self.base_url);
        let body = post_json("ollama", self.client.post(endpoint), &payload).await?;
        embedding_from(body.get("embedding")).ok_or_else(|| LlmError::Malformed {
            provider: "ollama",
            what: "embedding",
            body: body.to_string(),
        })
    }
}

fn parse_ollama_chat(body: &Value) -> Option<String> {
    body.get("message")
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

// ── OpenRouter / OpenAI-compatible ───────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenRouterClient {
    /// Fails with [`LlmError::MissingCredentials`] when `api_key` is blank.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> LlmResult<Self> {
        let api_key = api_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or(LlmError::MissingCredentials { provider: "openrouter" })?;
        Ok(Self {
            client: http_client(timeout),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/{path}", self.base_url))
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", "https://kitabite.local")
            .header("X-Title", "Kitabite")
    }

    pub async fn chat(&self, model: &str, system: &str, user: &str, json_mode: bool) -> LlmResult<String> {
        let mut payload = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ]
        });
        if json_mode {
            payload["response_format"] = json!({"type": "json_object"});
        }
        let body = post_json("openrouter", self.post("chat/completions"), &payload).await?;
        parse_openai_chat(&body).ok_or_else(|| LlmError::Malformed {
            provider: "openrouter",
            what: "choices[0].message.content",
            body: body.to_string(),
        })
    }

    pub async fn embed(&self, model: &str, text: &str) -> LlmResult<Vec<f32>> {
        let payload = json!({ "model": model, "input": text });
        let body = post_json("openrouter", self.post("embeddings"), &payload).await?;
        let data = body
            .get("data")
            .and_then(|data| data.get(0))
            .and_then(|item| item.get("embedding"));
        embedding_from(data).ok_or_else(|| LlmError::Malformed {
            provider: "openrouter",
            what: "data[0].embedding",
            body: body.to_string(),
        })
    }
}

fn parse_openai_chat(body: &Value) -> Option<String> {
    body.get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

// ── Router ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub provider: Provider,
    pub chat_model: String,
    pub embed_model: String,
    pub ollama_base_url: String,
    pub openai_base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
enum Backend {
    Ollama(OllamaClient),
    OpenRouter(OpenRouterClient),
}

/// One provider plus the chat and embedding models to use with it.
#[derive(Debug, Clone)]
pub struct LlmRouter {
    backend: Backend,
    chat_model: String,
    embed_model: String,
}

impl LlmRouter {
    pub fn new(settings: LlmSettings) -> LlmResult<Self> {
        let backend = match settings.provider {
            Provider::Ollama => Backend::Ollama(OllamaClient::new(settings.ollama_base_url, settings.timeout)),
            Provider::OpenRouter => Backend::OpenRouter(OpenRouterClient::new(
                settings.openai_base_url,
                settings.api_key,
                settings.timeout,
            )?),
        };
        Ok(Self {
            backend,
            chat_model: settings.chat_model,
            embed_model: settings.embed_model,
        })
    }

    pub fn provider(&self) -> Provider {
        match self.backend {
            Backend::Ollama(_) => Provider::Ollama,
            Backend::OpenRouter(_) => Provider::OpenRouter,
        }
    }

    pub fn chat_model(&self) -> &str {
        &self.chat_model
    }

    /// Chat call constrained to a single JSON object reply.
    pub async fn chat_json(&self, system: &str, user: &str) -> LlmResult<String> {
        self.chat(system, user, true).await
    }

    pub async fn chat_text(&self, system: &str, user: &str) -> LlmResult<String> {
        self.chat(system, user, false).await
    }

    async fn chat(&self, system: &str, user: &str, json_mode: bool) -> LlmResult<String> {
        debug!(provider = self.provider().name(), model = %self.chat_model, json_mode, "chat request");
        match &self.backend {
            Backend::Ollama(c) => c.chat(&self.chat_model, system, user, json_mode).await,
            Backend::OpenRouter(c) => c.chat(&self.chat_model, system, user, json_mode).await,
        }
    }

    pub async fn embed(&self, text: &str) -> LlmResult<Vec<f32>> {
        match &self.backend {
            Backend::Ollama(c) => c.embed(&self.embed_model, text).await,
            Backend::OpenRouter(c) => c.embed(&self.embed_model, text).await,
        }
    }
}

// ── Structured output extraction ──────────────────────────────────────────────

/// Extract a JSON value from an LLM reply.
///
/// Tries the whole reply first, then the first fenced ` ```json ` block,
/// then the span from the first `{` to the last `}`.  Returns `None` when
/// none of them parse as `T`.
pub fn extract_json_output<T: serde::de::DeserializeOwned>(response: &str) -> Option<T> {
    let trimmed = response.trim();
    if let Ok(val) = serde_json::from_str(trimmed) {
        return Some(val);
    }

    // Fenced ```json ... ``` blocks.
    if let Some(fence_start) = trimmed.find("```json") {
        let after_fence = &trimmed[fence_start + "```json".len()..];
        if let Some(fence_end) = after_fence.find("```") {
            let json_str = after_fence[..fence_end].trim();
            if let Ok(val) = serde_json::from_str(json_str) {
                return Some(val);
            }
        }
    }

    // Bare object: first '{' to last '}'.
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end > start {
            if let Ok(val) = serde_json::from_str(&trimmed[start..=end]) {
                return Some(val);
            }
        }
    }

    None
}

// ── Tests ────────────────────────────────────────────────────────────────────
