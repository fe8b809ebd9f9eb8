use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::{
    ensure_success, parse_json_object, GenerateOptions, Provider, ProviderError, ProviderProfile,
};

/// Locally hosted Ollama server
///
/// Availability means the server answers `/api/tags` and has the configured
/// model pulled.
pub struct OllamaProvider {
    profile: ProviderProfile,
    client: Client,
}

impl OllamaProvider {
    pub fn new(profile: ProviderProfile) -> Result<Self, ProviderError> {
        let client = profile.http_client()?;
        Ok(Self { profile, client })
    }

    async fn call_generate(&self, body: Value) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(self.profile.endpoint("/api/generate"))
            .json(&body)
            .send()
            .await?;

        let json: Value = ensure_success(response).await?.json().await?;

        json.get("response")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::MalformedResponse("missing `response` field".to_string()))
    }

    fn has_model(&self, tags: &Value) -> bool {
        let wanted = self.profile.model.as_str();
        tags.get("models")
            .and_then(Value::as_array)
            .map(|models| {
                models.iter().any(|model| {
                    model
                        .get("name")
                        .and_then(Value::as_str)
                        .is_some_and(|name| name == wanted || name.split(':').next() == Some(wanted))
                })
            })
            .unwrap_or(false)
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn cost(&self) -> f64 {
        self.profile.cost_per_k_tokens
    }

    fn latency(&self) -> Duration {
        Duration::from_millis(self.profile.avg_latency_ms)
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn is_available(&self) -> bool {
        let response = match self.client.get(self.profile.endpoint("/api/tags")).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                tracing::debug!("Ollama probe returned {}", response.status());
                return false;
            }
            Err(e) => {
                tracing::debug!("Ollama probe failed: {}", e);
                return false;
            }
        };

        match response.json::<Value>().await {
            Ok(tags) if self.has_model(&tags) => true,
            Ok(_) => {
                tracing::warn!("Ollama is running but model {} is not pulled", self.profile.model);
                false
            }
            Err(e) => {
                tracing::debug!("Ollama probe returned unreadable tags: {}", e);
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
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": options.temperature,
                "num_predict": options.max_tokens,
            },
        });
        if let Some(system) = &options.system_prompt {
            body["system"] = Value::String(system.clone());
        }

        self.call_generate(body).await
    }

    async fn extract_structured(&self, prompt: &str) -> Result<Value, ProviderError> {
        let body = json!({
            "model": self.profile.model,
            "prompt": prompt,
            "stream": false,
            "format": "json",
            "options": { "temperature": 0.0 },
        });

        let text = self.call_generate(body).await?;
        parse_json_object(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(base_url: String) -> ProviderProfile {
        ProviderProfile {
            base_url,
            model: "llama3.1".to_string(),
            api_key: None,
            cost_per_k_tokens: 0.0,
            avg_latency_ms: 900,
            request_timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_available_when_model_pulled() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"models":[{"name":"llama3.1:latest"}]}"#)
            .create_async()
            .await;

        let provider = OllamaProvider::new(profile(server.url())).unwrap();

        assert!(provider.is_available().await);
        assert!(provider.is_local());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unavailable_without_model() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_body(r#"{"models":[{"name":"mistral:latest"}]}"#)
            .create_async()
            .await;

        let provider = OllamaProvider::new(profile(server.url())).unwrap();

        assert!(!provider.is_available().await);
    }

    #[tokio::test]
    async fn test_generate_reads_response_field() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/generate")
            .with_status(200)
            .with_body(r#"{"model":"llama3.1","response":"Try Spice Pavilion.","done":true}"#)
            .create_async()
            .await;

        let provider = OllamaProvider::new(profile(server.url())).unwrap();
        let text = provider
            .generate("recommend", &GenerateOptions::default())
            .await
            .unwrap();

        assert_eq!(text, "Try Spice Pavilion.");
    }

    #[tokio::test]
    async fn test_server_error_is_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/generate")
            .with_status(500)
            .with_body("model crashed")
            .create_async()
            .await;

        let provider = OllamaProvider::new(profile(server.url())).unwrap();
        let err = provider.extract_structured("classify").await.unwrap_err();

        assert!(matches!(err, ProviderError::ApiError { status: 500, .. }));
    }
}
