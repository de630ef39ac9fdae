//! HTTP inference backend for OpenAI-compatible chat completion APIs
//!
//! Talks to OpenRouter by default. Transport and HTTP failures are mapped onto
//! the crate's error taxonomy so [`call_with_retry`](super::call_with_retry)
//! and the engine's fallbacks can react to them. Model-specific failures fall
//! through the configured fallback model list.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use tracing::{debug, error, info, warn};

use crate::config::LlmConfig;
use crate::error::{Error, Result};

use super::backend::{InferenceBackend, InferenceOutput, InferenceParams};
use super::types::{ChatRequest, ChatResponse, Message};

/// OpenRouter API base URL
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Chat-completions backend over HTTP
#[derive(Clone)]
pub struct HttpBackend {
    http_client: HttpClient,
    config: LlmConfig,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("base_url", &self.base_url)
            .field("default_model", &self.config.default_model)
            .finish()
    }
}

/// Builder for [`HttpBackend`]
#[derive(Default)]
pub struct HttpBackendBuilder {
    config: Option<LlmConfig>,
    api_key: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

impl HttpBackendBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: LlmConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Override the base URL (defaults to the configured one, then OpenRouter)
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn build(self) -> Result<HttpBackend> {
        let config = self.config.unwrap_or_default();
        let api_key = self
            .api_key
            .ok_or_else(|| Error::LLMError("API key is required".to_string()))?;

        let timeout_secs = self.timeout_secs.unwrap_or(config.timeout_secs);
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(Error::NetworkError)?;

        let base_url = self
            .base_url
            .or_else(|| config.base_url.clone())
            .unwrap_or_else(|| OPENROUTER_BASE_URL.to_string());

        Ok(HttpBackend {
            http_client,
            config,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl HttpBackend {
    pub fn new(config: LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        HttpBackendBuilder::new()
            .config(config)
            .api_key(api_key)
            .build()
    }

    pub fn builder() -> HttpBackendBuilder {
        HttpBackendBuilder::new()
    }

    pub fn default_model(&self) -> &str {
        &self.config.default_model
    }

    pub fn fallback_models(&self) -> &[String] {
        &self.config.fallback_models
    }

    fn messages(prompt: &str, params: &InferenceParams) -> Vec<Message> {
        let mut system = format!("You are the {} agent.", params.agent_id);
        if let Some(framing) = &params.framing {
            system.push(' ');
            system.push_str(framing);
        }
        vec![Message::system(system), Message::user(prompt)]
    }

    /// Try the requested (or default) model, then each fallback model on model errors
    async fn complete_with_fallback(
        &self,
        prompt: &str,
        params: &InferenceParams,
    ) -> Result<(ChatResponse, String)> {
        let mut models = vec![
            params
                .model
                .clone()
                .unwrap_or_else(|| self.config.default_model.clone()),
        ];
        models.extend(self.config.fallback_models.iter().cloned());
        models.dedup();

        let mut last_error = None;
        for model in &models {
            let request = ChatRequest::new(model.clone(), Self::messages(prompt, params))
                .with_temperature(params.temperature)
                .with_max_tokens(params.max_tokens);

            match self.send_request(&request).await {
                Ok(response) => return Ok((response, model.clone())),
                Err(Error::LLMError(msg)) if is_model_error(&msg) => {
                    warn!(model = %model, error = %msg, "Model error, trying next model");
                    last_error = Some(Error::LLMError(msg));
                }
                Err(e) => {
                    if !e.is_retryable() {
                        error!(model = %model, error = %e, "Non-recoverable backend error");
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| Error::BackendUnavailable("all models failed".to_string())))
    }

    async fn send_request(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Sending chat completion request"
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("X-Title", "Switchboard")
            .json(request)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status.as_u16(), &body));
        }

        response
            .json::<ChatResponse>()
            .await
            .map_err(|e| Error::LLMError(format!("Failed to parse response: {}", e)))
    }
}

#[async_trait]
impl InferenceBackend for HttpBackend {
    async fn execute(&self, prompt: &str, params: &InferenceParams) -> Result<InferenceOutput> {
        let start = Instant::now();
        let (response, model) = self.complete_with_fallback(prompt, params).await?;
        let latency_ms = start.elapsed().as_millis() as u64;

        let text = response
            .first_content()
            .ok_or_else(|| Error::LLMError("Empty response from API".to_string()))?
            .to_string();
        let token_count = response
            .usage
            .as_ref()
            .map(|u| u.total())
            .unwrap_or_else(|| estimate_tokens(prompt, &text));
        let cost_usd = token_count as f64 / 1000.0 * self.config.cost_per_1k_tokens;

        info!(
            model = %model,
            agent = %params.agent_id,
            tokens = token_count,
            latency_ms = latency_ms,
            "Chat completion successful"
        );

        Ok(InferenceOutput {
            text,
            latency_ms,
            token_count,
            cost_usd,
            confidence: None,
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

fn map_transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::BackendTimeout(e.to_string())
    } else if e.is_connect() {
        Error::BackendUnavailable(e.to_string())
    } else {
        Error::NetworkError(e)
    }
}

fn map_status(status: u16, body: &str) -> Error {
    match status {
        401 => Error::LLMError(
            "Unauthorized: Invalid API key. Set SWITCHBOARD_API_KEY or OPENROUTER_API_KEY."
                .to_string(),
        ),
        402 => Error::LLMError("Payment required: insufficient credits".to_string()),
        404 => Error::LLMError(format!("Model not found or endpoint unavailable: {}", body)),
        408 | 504 => Error::BackendTimeout(format!("HTTP {}", status)),
        429 => Error::RateLimited(extract_retry_after(body).unwrap_or(1)),
        500..=599 => Error::BackendUnavailable(format!("Server error ({}): {}", status, body)),
        _ => Error::LLMError(format!("HTTP error {}: {}", status, body)),
    }
}

/// Rough token estimate, ~4 characters per token
fn estimate_tokens(prompt: &str, completion: &str) -> u32 {
    ((prompt.len() + completion.len()) / 4) as u32
}

fn is_model_error(msg: &str) -> bool {
    let patterns = [
        "model not found",
        "not available",
        "no available provider",
        "overloaded",
        "capacity",
    ];
    let msg = msg.to_lowercase();
    patterns.iter().any(|p| msg.contains(p))
}

fn extract_retry_after(body: &str) -> Option<u64> {
    let json = serde_json::from_str::<serde_json::Value>(body).ok()?;
    json.get("retry_after")
        .or_else(|| json.get("error").and_then(|e| e.get("retry_after")))
        .and_then(|v| v.as_u64())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> LlmConfig {
        LlmConfig {
            default_model: "test/model".to_string(),
            fallback_models: vec!["fallback/model".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_builder() {
        let backend = HttpBackend::builder()
            .config(test_config())
            .api_key("test-key")
            .base_url("https://example.com/v1/")
            .timeout_secs(5)
            .build()
            .unwrap();
        assert_eq!(backend.default_model(), "test/model");
        assert_eq!(backend.base_url, "https://example.com/v1");
        assert_eq!(backend.fallback_models(), &["fallback/model"]);
    }

    #[test]
    fn test_builder_requires_api_key() {
        assert!(HttpBackend::builder().config(test_config()).build().is_err());
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(map_status(503, ""), Error::BackendUnavailable(_)));
        assert!(matches!(map_status(504, ""), Error::BackendTimeout(_)));
        assert!(matches!(
            map_status(429, r#"{"retry_after": 3}"#),
            Error::RateLimited(3)
        ));
        assert!(matches!(map_status(400, "bad"), Error::LLMError(_)));
        assert!(map_status(502, "").is_retryable());
        assert!(!map_status(401, "").is_retryable());
    }

    #[test]
    fn test_extract_retry_after() {
        assert_eq!(extract_retry_after(r#"{"retry_after": 30}"#), Some(30));
        assert_eq!(extract_retry_after(r#"{"error": {"retry_after": 60}}"#), Some(60));
        assert_eq!(extract_retry_after("not json"), None);
    }

    #[test]
    fn test_is_model_error() {
        assert!(is_model_error("Model not found"));
        assert!(is_model_error("provider overloaded"));
        assert!(!is_model_error("Invalid API key"));
    }

    #[test]
    fn test_messages_include_framing() {
        let params = InferenceParams::new("coder").with_framing("Think step by step.");
        let messages = HttpBackend::messages("Implement quicksort", &params);
        assert_eq!(messages.len(), 2);
        assert!(messages[0].content.contains("coder"));
        assert!(messages[0].content.contains("step by step"));
        assert_eq!(messages[1].content, "Implement quicksort");
    }

    #[test]
    fn test_backend_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HttpBackend>();
    }
}
