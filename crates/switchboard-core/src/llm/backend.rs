//! Inference backend contract

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Per-call parameters passed to a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceParams {
    /// Agent profile the call is made on behalf of
    pub agent_id: String,
    /// Model override; backends fall back to their configured default
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: usize,
    /// Optional framing prepended as a system instruction
    pub framing: Option<String>,
}

impl InferenceParams {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            ..Default::default()
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_framing(mut self, framing: impl Into<String>) -> Self {
        self.framing = Some(framing.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

impl Default for InferenceParams {
    fn default() -> Self {
        Self {
            agent_id: "generalist".to_string(),
            model: None,
            temperature: 0.7,
            max_tokens: 2048,
            framing: None,
        }
    }
}

/// Result of a single backend call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceOutput {
    pub text: String,
    pub latency_ms: u64,
    pub token_count: u32,
    pub cost_usd: f64,
    /// Self-reported confidence in [0, 1], when the backend provides one
    pub confidence: Option<f64>,
}

/// Black-box language model backend
///
/// Implementations report transient failures as
/// [`Error::BackendTimeout`](crate::error::Error::BackendTimeout),
/// [`Error::BackendUnavailable`](crate::error::Error::BackendUnavailable) or
/// [`Error::RateLimited`](crate::error::Error::RateLimited) so callers can retry.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Execute a prompt
    async fn execute(&self, prompt: &str, params: &InferenceParams) -> Result<InferenceOutput>;

    /// Short name used in logs
    fn name(&self) -> &str;
}
