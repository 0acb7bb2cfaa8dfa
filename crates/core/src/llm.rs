//! Chat-completion providers.

use crate::config::{parse_base_url, ChatConfig};
use crate::error::PipelineError;
use crate::models::ChatRole;
use crate::retry::{is_transient_status, Backoff};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

impl From<ChatRole> for PromptRole {
    fn from(role: ChatRole) -> Self {
        match role {
            ChatRole::User => PromptRole::User,
            ChatRole::Assistant => PromptRole::Assistant,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: PromptRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_id(&self) -> &str;

    async fn complete(&self, messages: &[PromptMessage]) -> Result<String, PipelineError>;
}

pub fn chat_model(
    config: &ChatConfig,
    api_key: Option<&str>,
) -> Result<Arc<dyn ChatModel>, PipelineError> {
    let api_key = api_key.filter(|key| !key.trim().is_empty()).ok_or_else(|| {
        PipelineError::Configuration("OPENAI_API_KEY is required for chat completions".to_string())
    })?;
    Ok(Arc::new(OpenAiChat::new(config, api_key)?))
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible `/chat/completions` client.
pub struct OpenAiChat {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    backoff: Backoff,
}

impl OpenAiChat {
    pub fn new(config: &ChatConfig, api_key: impl Into<String>) -> Result<Self, PipelineError> {
        let base = parse_base_url(&config.base_url)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| PipelineError::Configuration(format!("http client: {error}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base.as_str().trim_end_matches('/')),
            api_key: api_key.into(),
            model: config.model.clone(),
            temperature: config.temperature,
            backoff: Backoff::new(config.max_retries),
        })
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    async fn request(&self, messages: &[PromptMessage]) -> Result<String, PipelineError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "temperature": self.temperature,
                "messages": messages,
            }))
            .send()
            .await
            .map_err(|error| PipelineError::Generation {
                details: format!("request to {} failed: {error}", self.endpoint),
                transient: true,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Generation {
                details: format!("{} returned {status}: {body}", self.endpoint),
                transient: is_transient_status(status),
            });
        }

        let payload: CompletionResponse = response
            .json()
            .await
            .map_err(|error| PipelineError::generation(format!("malformed response: {error}")))?;

        payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| PipelineError::generation("response contained no answer text"))
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[PromptMessage]) -> Result<String, PipelineError> {
        debug!(model = %self.model, messages = messages.len(), "requesting chat completion");
        self.backoff
            .run("chat completion", || self.request(messages))
            .await
    }
}
