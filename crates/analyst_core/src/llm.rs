//! Model-provider boundary. Three request shapes (strict-JSON routing,
//! free-text conversation, code generation), all treated as untrusted text
//! by callers. The trait seam exists so hosts and tests can substitute the
//! provider without touching the router or contract layers.

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::ModelSettings;

const DEFAULT_BASE: &str = "https://api.openai.com";

#[derive(Debug, Error)]
pub enum ModelError {
    /// The configured per-request timeout expired.
    #[error("model request timed out")]
    Timeout,
    #[error("model endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("model transport error: {0}")]
    Transport(String),
    #[error("model response carried no content")]
    EmptyResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Structured classification; the reply is expected (not trusted) to be
    /// a single JSON object.
    async fn chat_json(&self, messages: &[ChatMessage]) -> Result<String, ModelError>;

    /// Free-text conversational completion.
    async fn chat_text(&self, messages: &[ChatMessage]) -> Result<String, ModelError>;

    /// Code-generation completion; the reply may be fenced in a markdown
    /// code block the caller must strip.
    async fn generate_code(&self, messages: &[ChatMessage]) -> Result<String, ModelError>;
}

pub struct OpenAiClient {
    settings: ModelSettings,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(settings: ModelSettings) -> Result<Self, ModelError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ModelError::Transport(e.to_string()))?;
        Ok(Self { settings, http })
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        json_mode: bool,
        temperature: f64,
    ) -> Result<String, ModelError> {
        let base = self
            .settings
            .base
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE.to_string());
        let url = format!("{}/v1/chat/completions", base.trim_end_matches('/'));
        let body = ChatRequest {
            model: &self.settings.model,
            messages,
            temperature,
            response_format: json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        debug!(url = %url, json_mode, n_messages = messages.len(), "model request");
        let resp = self
            .http
            .post(&url)
            .header(
                AUTHORIZATION,
                format!("Bearer {}", self.settings.api_key),
            )
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ModelError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = resp.json().await.map_err(map_reqwest)?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(ModelError::EmptyResponse)
    }
}

fn map_reqwest(e: reqwest::Error) -> ModelError {
    if e.is_timeout() {
        ModelError::Timeout
    } else {
        ModelError::Transport(e.to_string())
    }
}

#[async_trait]
impl ModelProvider for OpenAiClient {
    async fn chat_json(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
        // JSON mode keeps routing clean.
        self.chat(messages, true, 0.2).await
    }

    async fn chat_text(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
        self.chat(messages, false, 0.2).await
    }

    async fn generate_code(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
        self.chat(messages, false, 0.0).await
    }
}
