//! Text-generation client
//!
//! Both the meta-prompt trainer and the evaluation battery go through
//! the [`TextGenerator`] trait, so tests can script responses without a
//! network. The production implementation talks to any OpenAI-style
//! chat completions endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, TrainError};

/// Settings for the generation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Base URL of an OpenAI-compatible API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model used for prompt rewriting and evaluation runs.
    #[serde(default = "default_model")]
    pub model: String,

    /// API key. Falls back to the OPENROUTER_API_KEY environment
    /// variable when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Per-request timeout. A training run that exceeds this is
    /// recorded as failed rather than left hanging.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_model() -> String {
    "anthropic/claude-3.5-sonnet".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_tokens() -> u32 {
    2048
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl GenerationConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
    }
}

/// External text-generation capability.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate one completion for a system prompt + user input pair.
    async fn generate(&self, system: &str, user: &str) -> Result<String>;
}

/// HTTP client for OpenAI-style chat completion APIs.
pub struct HttpTextGenerator {
    client: Arc<Client>,
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_tokens: u32,
}

impl HttpTextGenerator {
    /// Build the client. A missing API key is not an error here; the
    /// failure surfaces on the first actual generation call, so
    /// read-only commands work without credentials.
    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client: Arc::new(client),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.resolve_api_key(),
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate(&self, system: &str, user: &str) -> Result<String> {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            TrainError::Generation(
                "no API key configured (set [generation].api_key or OPENROUTER_API_KEY)"
                    .to_string(),
            )
        })?;

        let request = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "max_tokens": self.max_tokens,
        });

        debug!("Generation request to {} ({})", self.base_url, self.model);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TrainError::Generation(format!(
                "API error ({}): {}",
                status,
                crate::truncate_safe(&body, 500)
            )));
        }

        let raw: Value = serde_json::from_str(&response.text().await?)?;
        let content = extract_content(&raw).ok_or_else(|| {
            TrainError::Generation("response contained no message content".to_string())
        })?;

        if content.trim().is_empty() {
            return Err(TrainError::Generation(
                "model returned an empty completion".to_string(),
            ));
        }

        Ok(content)
    }
}

/// Pull the assistant text out of a chat completions response. Handles
/// both plain-string content and the array-of-parts form some providers
/// return.
fn extract_content(raw: &Value) -> Option<String> {
    let content = raw.get("choices")?.get(0)?.get("message")?.get("content")?;

    match content {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => {
            let text: String = parts
                .iter()
                .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("");
            if text.is_empty() {
                None
            } else {
                Some(text)
            }
        }
        _ => None,
    }
}
