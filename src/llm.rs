//! Completion port over an OpenAI-compatible HTTP API.

use crate::error::{CopilotError, Result};
use crate::orchestrator_service::ports::{
    Completion, CompletionPort, CompletionRequest, PortFuture, PromptRole,
};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    pub embedding_model: Option<String>,
    pub api_key: Option<String>,
    pub max_concurrency: usize,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            embedding_model: None,
            api_key: None,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

/// Chat completions client with a bound on in-flight requests.
///
/// No request timeout is set; long generations are expected. Rate limits
/// and server errors come back as retryable errors for the backoff wrapper.
#[derive(Clone)]
pub struct OpenAiCompletion {
    client: reqwest::Client,
    chat_url: Url,
    embeddings_url: Url,
    settings: LlmSettings,
    permits: Arc<Semaphore>,
}

impl OpenAiCompletion {
    /// # Errors
    /// Returns `ConfigError` when the base URL cannot be parsed.
    pub fn new(settings: LlmSettings) -> Result<Self> {
        let base = normalized_base(&settings.base_url)?;
        let chat_url = base
            .join("chat/completions")
            .map_err(|e| CopilotError::ConfigError(format!("Invalid LLM base URL: {e}")))?;
        let embeddings_url = base
            .join("embeddings")
            .map_err(|e| CopilotError::ConfigError(format!("Invalid LLM base URL: {e}")))?;
        Ok(Self {
            client: reqwest::Client::new(),
            chat_url,
            embeddings_url,
            permits: Arc::new(Semaphore::new(settings.max_concurrency.max(1))),
            settings,
        })
    }

    #[must_use]
    pub const fn settings(&self) -> &LlmSettings {
        &self.settings
    }

    async fn post(&self, url: &Url, body: &Value) -> Result<String> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| CopilotError::completion(format!("LLM client closed: {e}"), false))?;

        let mut request = self.client.post(url.clone()).json(body);
        if let Some(key) = self.settings.api_key.as_deref() {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(|e| {
            CopilotError::completion(
                format!("LLM request failed: {e}"),
                e.is_timeout() || e.is_connect() || e.is_request(),
            )
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            CopilotError::completion(format!("Failed to read LLM response: {e}"), true)
        })?;
        if !status.is_success() {
            return Err(status_error(status, &text));
        }
        Ok(text)
    }

    async fn chat(&self, request: CompletionRequest) -> Result<Completion> {
        let body = chat_body(&self.settings.model, &request);
        let raw = self.post(&self.chat_url, &body).await?;
        let completion = parse_chat_response(&raw, request.response_schema.is_some())?;
        debug!(
            purpose = request.purpose.as_str(),
            model = %self.settings.model,
            chars = completion.text.len(),
            "completion received"
        );
        Ok(completion)
    }

    async fn embedding(&self, text: &str) -> Result<Option<Vec<f32>>> {
        let Some(model) = self.settings.embedding_model.as_deref() else {
            return Ok(None);
        };
        let raw = self
            .post(&self.embeddings_url, &json!({"model": model, "input": text}))
            .await?;
        let parsed: EmbeddingResponse = serde_json::from_str(&raw)
            .map_err(|e| CopilotError::completion(format!("Malformed embedding response: {e}"), false))?;
        Ok(parsed.data.into_iter().next().map(|item| item.embedding))
    }
}

impl CompletionPort for OpenAiCompletion {
    fn complete(&self, request: CompletionRequest) -> PortFuture<'_, Completion> {
        Box::pin(self.chat(request))
    }

    fn embed<'a>(&'a self, text: &'a str) -> PortFuture<'a, Option<Vec<f32>>> {
        Box::pin(self.embedding(text))
    }
}

fn normalized_base(base_url: &str) -> Result<Url> {
    let mut base = base_url.trim().to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    Url::parse(&base).map_err(|e| CopilotError::ConfigError(format!("Invalid LLM base URL: {e}")))
}

const fn role_name(role: PromptRole) -> &'static str {
    match role {
        PromptRole::System => "system",
        PromptRole::User => "user",
        PromptRole::Assistant => "assistant",
    }
}

fn chat_body(model: &str, request: &CompletionRequest) -> Value {
    let messages: Vec<Value> = request
        .messages
        .iter()
        .map(|message| json!({"role": role_name(message.role), "content": message.content}))
        .collect();
    let mut body = json!({
        "model": model,
        "messages": messages,
        "temperature": request.temperature,
    });
    if let Some(schema) = &request.response_schema {
        body["response_format"] = json!({
            "type": "json_schema",
            "json_schema": {
                "name": request.purpose.as_str(),
                "schema": schema,
            }
        });
    }
    body
}

fn parse_chat_response(raw: &str, structured: bool) -> Result<Completion> {
    let parsed: ChatResponse = serde_json::from_str(raw)
        .map_err(|e| CopilotError::completion(format!("Malformed completion response: {e}"), false))?;
    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| CopilotError::completion("Completion returned no choices", true))?;
    let value = structured
        .then(|| serde_json::from_str::<Value>(&content).ok())
        .flatten();
    Ok(Completion {
        text: content,
        structured: value,
    })
}

fn status_error(status: StatusCode, body: &str) -> CopilotError {
    let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
    let snippet: String = body.chars().take(300).collect();
    CopilotError::completion(format!("LLM API error {status}: {snippet}"), retryable)
}
