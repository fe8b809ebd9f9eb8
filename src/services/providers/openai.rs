use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::{
    ensure_success, parse_json_object, GenerateOptions, Provider, ProviderError, ProviderProfile,
};

const STRUCTURED_SYSTEM_PROMPT: &str =
    "You are a classifier. Respond with a single JSON object and nothing else.";

/// OpenAI-compatible chat completions backend
pub struct OpenAiProvider {
    profile: ProviderProfile,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(profile: ProviderProfile) -> Result<Self, ProviderError> {
        let client = profile.http_client()?;
        Ok(Self { profile, client })
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        self.profile
            .api_key()
            .ok_or_else(|| ProviderError::NotConfigured("OpenAI API key missing".to_string()))
    }

    async fn chat(&self, body: Value) -> Result<String, ProviderError> {
        let key = self.api_key()?;

        let response = self
            .client
            .post(self.profile.endpoint("/chat/completions"))
            .bearer_auth(key)
            .json(&body)
            .send()
            .await?;

        let json: Value = ensure_success(response).await?.json().await?;

        json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ProviderError::MalformedResponse("missing choices[0].message.content".to_string()))
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
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
            .get(self.profile.endpoint("/models"))
            .bearer_auth(key)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("OpenAI probe failed: {}", e);
                false
            }
        }
    }

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<String, ProviderError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &options.system_prompt {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": prompt }));

        self.chat(json!({
            "model": self.profile.model,
            "messages": messages,
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
        }))
        .await
    }

    async fn extract_structured(&self, prompt: &str) -> Result<Value, ProviderError> {
        let text = self
            .chat(json!({
                "model": self.profile.model,
                "messages": [
                    { "role": "system", "content": STRUCTURED_SYSTEM_PROMPT },
                    { "role": "user", "content": prompt },
                ],
                "temperature": 0.0,
                "response_format": { "type": "json_object" },
            }))
            .await?;

        parse_json_object(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn profile(base_url: String, api_key: Option<&str>) -> ProviderProfile {
        ProviderProfile {
            base_url,
            model: "gpt-4o-mini".to_string(),
            api_key: api_key.map(str::to_string),
            cost_per_k_tokens: 0.00015,
            avg_latency_ms: 600,
            request_timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_unavailable_without_key() {
        let provider = OpenAiProvider::new(profile("http://127.0.0.1:9".to_string(), None)).unwrap();

        assert!(!provider.is_available().await);
        let err = provider
            .generate("hi", &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_probe_sends_bearer_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/models")
            .match_header("authorization", "Bearer sk-test")
            .with_status(200)
            .with_body(r#"{"data":[]}"#)
            .create_async()
            .await;

        let provider = OpenAiProvider::new(profile(server.url(), Some("sk-test"))).unwrap();

        assert!(provider.is_available().await);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_extract_structured_parses_content() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::PartialJson(json!({
                "response_format": { "type": "json_object" }
            })))
            .with_status(200)
            .with_body(
                r#"{"choices":[{"message":{"role":"assistant","content":"{\"cuisine\":\"italian\",\"confidence\":0.9}"}}]}"#,
            )
            .create_async()
            .await;

        let provider = OpenAiProvider::new(profile(server.url(), Some("sk-test"))).unwrap();
        let value = provider.extract_structured("pasta").await.unwrap();

        assert_eq!(value["cuisine"], "italian");
    }

    #[tokio::test]
    async fn test_rate_limit_is_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body("slow down")
            .create_async()
            .await;

        let provider = OpenAiProvider::new(profile(server.url(), Some("sk-test"))).unwrap();
        let err = provider
            .generate("hi", &GenerateOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::ApiError { status: 429, .. }));
    }
}
