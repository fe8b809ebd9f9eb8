use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::{
    ensure_success, parse_json_object, GenerateOptions, Provider, ProviderError, ProviderProfile,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic messages API backend
pub struct AnthropicProvider {
    profile: ProviderProfile,
    client: Client,
}

impl AnthropicProvider {
    pub fn new(profile: ProviderProfile) -> Result<Self, ProviderError> {
        let client = profile.http_client()?;
        Ok(Self { profile, client })
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        self.profile
            .api_key()
            .ok_or_else(|| ProviderError::NotConfigured("Anthropic API key missing".to_string()))
    }

    async fn messages(&self, body: Value) -> Result<String, ProviderError> {
        let key = self.api_key()?;

        let response = self
            .client
            .post(self.profile.endpoint("/v1/messages"))
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let json: Value = ensure_success(response).await?.json().await?;

        json["content"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ProviderError::MalformedResponse("missing content[0].text".to_string()))
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn cost(&self) -> f64 {
        self.profile.cost_per_k_tokens
    }

    fn latency(&self) -> Duration {
        Duration::from_millis(self.profile.avg_latency_ms)
    }

    async fn is_available(&self) -> bool {
        let Ok(key) = self.api_key() else {
            return false;
        };

        match self
            .client
            .get(self.profile.endpoint("/v1/models"))
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("Anthropic probe failed: {}", e);
                false
            }
        }
    }

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<String, ProviderError> {
        let mut body = json!({
            "model": self.profile.model,
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
            "messages": [{ "role": "user", "content": prompt }],
        });
        if let Some(system) = &options.system_prompt {
            body["system"] = Value::String(system.clone());
        }

        self.messages(body).await
    }

    async fn extract_structured(&self, prompt: &str) -> Result<Value, ProviderError> {
        let text = self
            .messages(json!({
                "model": self.profile.model,
                "max_tokens": 256,
                "temperature": 0.0,
                "system": "Respond with a single JSON object and nothing else.",
                "messages": [{ "role": "user", "content": prompt }],
            }))
            .await?;

        parse_json_object(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(base_url: String) -> ProviderProfile {
        ProviderProfile {
            base_url,
            model: "claude-3-5-haiku-latest".to_string(),
            api_key: Some("test-key".to_string()),
            cost_per_k_tokens: 0.0008,
            avg_latency_ms: 700,
            request_timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_generate_sends_version_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .match_header("x-api-key", "test-key")
            .match_header("anthropic-version", ANTHROPIC_VERSION)
            .with_status(200)
            .with_body(r#"{"content":[{"type":"text","text":"Nonna's Kitchen is a good fit."}]}"#)
            .create_async()
            .await;

        let provider = AnthropicProvider::new(profile(server.url())).unwrap();
        let text = provider
            .generate("narrate", &GenerateOptions::default())
            .await
            .unwrap();

        assert_eq!(text, "Nonna's Kitchen is a good fit.");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_text_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/messages")
            .with_status(200)
            .with_body(r#"{"content":[]}"#)
            .create_async()
            .await;

        let provider = AnthropicProvider::new(profile(server.url())).unwrap();
        let err = provider.extract_structured("classify").await.unwrap_err();

        assert!(matches!(err, ProviderError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_probe_fails_on_unauthorized() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/models")
            .with_status(401)
            .create_async()
            .await;

        let provider = AnthropicProvider::new(profile(server.url())).unwrap();

        assert!(!provider.is_available().await);
    }
}
