//! LLM Gateway
//!
//! One `complete(prompt) -> text` capability over two provider request
//! shapes. The provider is a pure function of the model name. Calls are
//! never retried; a failure is returned to the turn that made it.

use crate::config::LlmSettings;
use crate::error::{AssistantError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const GEMINI_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LlmProvider {
    /// "generate content" shape: model in the path, key in `x-goog-api-key`
    #[serde(rename = "gemini")]
    Gemini,
    /// "chat completion" shape: model in the body, bearer token header
    #[serde(rename = "openai")]
    OpenAi,
}

impl LlmProvider {
    pub fn from_model(model: &str) -> Self {
        if model.starts_with("gpt-") || model.starts_with("o1-") {
            LlmProvider::OpenAi
        } else {
            LlmProvider::Gemini
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::Gemini => "gemini",
            LlmProvider::OpenAi => "openai",
        }
    }

    fn default_base_url(&self) -> &'static str {
        match self {
            LlmProvider::Gemini => GEMINI_BASE_URL,
            LlmProvider::OpenAi => OPENAI_BASE_URL,
        }
    }

    pub fn endpoint(&self, base_url: &str, model: &str) -> String {
        let base_url = base_url.trim_end_matches('/');
        match self {
            LlmProvider::Gemini => format!("{}/models/{}:generateContent", base_url, model),
            LlmProvider::OpenAi => format!("{}/chat/completions", base_url),
        }
    }

    pub fn request_body(&self, model: &str, prompt: &str) -> Value {
        match self {
            LlmProvider::Gemini => json!({
                "contents": [{ "parts": [{ "text": prompt }] }]
            }),
            LlmProvider::OpenAi => json!({
                "model": model,
                "messages": [{ "role": "user", "content": prompt }]
            }),
        }
    }

    /// Completion text of a successful response; empty when the shape is off.
    pub fn extract_text(&self, response: &Value) -> String {
        let text = match self {
            LlmProvider::Gemini => response
                .pointer("/candidates/0/content/parts/0/text")
                .and_then(Value::as_str),
            LlmProvider::OpenAi => response
                .pointer("/choices/0/message/content")
                .and_then(Value::as_str),
        };
        text.unwrap_or_default().to_string()
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Text completion, the only thing the pipeline asks of a model.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

pub struct LlmClient {
    provider: LlmProvider,
    model: String,
    api_key: Option<String>,
    base_url: String,
    client: Client,
}

impl LlmClient {
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(180))
            .build()?;
        Ok(Self {
            provider: settings.provider,
            model: settings.model.clone(),
            api_key: settings.api_key.clone(),
            base_url: settings.provider.default_base_url().to_string(),
            client,
        })
    }

    /// Point the client at a different host (proxy, gateway, local stub).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl CompletionService for LlmClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AssistantError::MissingCredential {
                provider: self.provider.to_string(),
            })?;

        let url = self.provider.endpoint(&self.base_url, &self.model);
        let body = self.provider.request_body(&self.model, prompt);
        debug!(
            "Calling {} model {} ({} prompt chars)",
            self.provider,
            self.model,
            prompt.len()
        );

        let request = self.client.post(&url).json(&body);
        let request = match self.provider {
            LlmProvider::Gemini => request.header(GEMINI_KEY_HEADER, api_key),
            LlmProvider::OpenAi => request.bearer_auth(api_key),
        };
        let response = request
            .send()
            .await
            .map_err(|e| {
                AssistantError::Llm(format!(
                    "{} API call failed: {}",
                    self.provider,
                    e.without_url()
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AssistantError::LlmStatus {
                provider: self.provider.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let response_json: Value = response
            .json()
            .await
            .map_err(|e| {
                AssistantError::Llm(format!("Failed to parse LLM response: {}", e.without_url()))
            })?;
        let text = self.provider.extract_text(&response_json);
        info!("{} returned {} chars", self.provider, text.len());
        Ok(text)
    }
}
