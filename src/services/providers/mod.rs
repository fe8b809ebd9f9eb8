//! Text-generation backends behind a single [`Provider`] trait.
//!
//! Each backend speaks its own HTTP protocol; the registry only ever sees the
//! trait. Timeouts for probing and generation are enforced by the registry,
//! the HTTP clients carry a request timeout of their own as well.

pub mod anthropic;
pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

pub use anthropic::AnthropicProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

/// Errors raised by a text-generation backend
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("API returned {status}: {body}")]
    ApiError { status: u16, body: String },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

/// Generation parameters shared by all backends
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    pub system_prompt: Option<String>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            max_tokens: 300,
            temperature: 0.3,
            system_prompt: None,
        }
    }
}

/// Connection and pricing details for one backend
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderProfile {
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub cost_per_k_tokens: f64,
    #[serde(default = "default_latency_ms")]
    pub avg_latency_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_latency_ms() -> u64 {
    800
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl ProviderProfile {
    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    pub(crate) fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|key| !key.is_empty())
    }

    pub(crate) fn http_client(&self) -> Result<reqwest::Client, ProviderError> {
        Ok(reqwest::Client::builder()
            .timeout(Duration::from_secs(self.request_timeout_secs.max(1)))
            .build()?)
    }
}

/// A pluggable text-generation backend
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Price per thousand tokens, in dollars
    fn cost(&self) -> f64;

    /// Expected round trip of a generation call
    fn latency(&self) -> Duration;

    /// Locally hosted backends get a reliability bonus during selection
    fn is_local(&self) -> bool {
        false
    }

    async fn is_available(&self) -> bool;

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<String, ProviderError>;

    /// Ask for a JSON object and parse it
    async fn extract_structured(&self, prompt: &str) -> Result<Value, ProviderError>;
}

/// Probe result for one backend, replaced wholesale on every probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDescriptor {
    pub name: String,
    pub cost_per_k_tokens: f64,
    pub avg_latency_ms: u64,
    pub local: bool,
    pub available: bool,
    pub score: f64,
    pub probed_at: chrono::DateTime<chrono::Utc>,
}

/// Turn a non-success response into [`ProviderError::ApiError`]
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unable to read body".to_string());
    Err(ProviderError::ApiError {
        status: status.as_u16(),
        body: body.chars().take(200).collect(),
    })
}

/// Extract the JSON object from model output
///
/// Models like to wrap JSON in prose or code fences, so the outermost
/// `{ ... }` span is parsed. Anything that is not an object is rejected.
pub fn parse_json_object(text: &str) -> Result<Value, ProviderError> {
    let start = text.find('{');
    let end = text.rfind('}');

    let candidate = match (start, end) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => {
            return Err(ProviderError::MalformedResponse(
                "no JSON object in response".to_string(),
            ))
        }
    };

    let value: Value = serde_json::from_str(candidate)
        .map_err(|e| ProviderError::MalformedResponse(format!("invalid JSON: {}", e)))?;

    if value.is_object() {
        Ok(value)
    } else {
        Err(ProviderError::MalformedResponse("expected a JSON object".to_string()))
    }
}
