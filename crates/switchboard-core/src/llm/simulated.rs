//! Deterministic offline backend
//!
//! Produces a reproducible completion from the prompt alone, so the CLI can
//! run end to end without network access and tests can script failures and
//! slow calls.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::backend::{InferenceBackend, InferenceOutput, InferenceParams};

/// Injected behaviour for calls whose framing contains a marker
#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail with `BackendUnavailable`
    Fail,
    /// Sleep before answering
    Delay(Duration),
}

/// Simulated inference backend
#[derive(Debug)]
pub struct SimulatedBackend {
    base_latency_ms: u64,
    cost_per_1k_tokens: f64,
    /// Maximum number of words echoed back
    word_budget: usize,
    delay: Option<Duration>,
    fail_first: AtomicU32,
    always_fail: bool,
    faults: Vec<(String, Fault)>,
    calls: AtomicU32,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self {
            base_latency_ms: 40,
            cost_per_1k_tokens: 0.002,
            word_budget: 48,
            delay: None,
            fail_first: AtomicU32::new(0),
            always_fail: false,
            faults: Vec::new(),
            calls: AtomicU32::new(0),
        }
    }
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long on every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the first `n` calls with `BackendUnavailable`
    pub fn fail_first(self, n: u32) -> Self {
        self.fail_first.store(n, Ordering::SeqCst);
        self
    }

    /// Fail every call
    pub fn always_fail(mut self) -> Self {
        self.always_fail = true;
        self
    }

    /// Apply `fault` to calls whose framing contains `marker`
    pub fn with_fault(mut self, marker: impl Into<String>, fault: Fault) -> Self {
        self.faults.push((marker.into(), fault));
        self
    }

    pub fn with_word_budget(mut self, words: usize) -> Self {
        self.word_budget = words.max(1);
        self
    }

    /// Number of `execute` calls made so far
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn completion(&self, prompt: &str, params: &InferenceParams) -> String {
        let mut seen = HashSet::new();
        let words: Vec<String> = prompt
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 3)
            .map(str::to_lowercase)
            .filter(|w| seen.insert(w.clone()))
            .take(self.word_budget)
            .collect();
        format!("[{}] {}", params.agent_id, words.join(" "))
    }
}

/// Stable value in [0, 1) derived from the call inputs
fn unit_hash(prompt: &str, params: &InferenceParams) -> f64 {
    let mut hasher = DefaultHasher::new();
    prompt.hash(&mut hasher);
    params.agent_id.hash(&mut hasher);
    params.temperature.to_bits().hash(&mut hasher);
    params.framing.hash(&mut hasher);
    (hasher.finish() % 10_000) as f64 / 10_000.0
}

#[async_trait]
impl InferenceBackend for SimulatedBackend {
    async fn execute(&self, prompt: &str, params: &InferenceParams) -> Result<InferenceOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.always_fail {
            return Err(Error::BackendUnavailable("simulated outage".to_string()));
        }
        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0
            && self
                .fail_first
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return Err(Error::BackendUnavailable("simulated transient failure".to_string()));
        }

        let mut waited = Duration::ZERO;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
            waited += delay;
        }
        if let Some(framing) = &params.framing {
            for (marker, fault) in &self.faults {
                if !framing.contains(marker.as_str()) {
                    continue;
                }
                match fault {
                    Fault::Fail => {
                        return Err(Error::BackendUnavailable(format!(
                            "simulated failure for '{}'",
                            marker
                        )));
                    }
                    Fault::Delay(d) => {
                        tokio::time::sleep(*d).await;
                        waited += *d;
                    }
                }
            }
        }

        let text = self.completion(prompt, params);
        let token_count = ((prompt.len() + text.len()) / 4) as u32;
        let latency_ms = self.base_latency_ms + prompt.len() as u64 / 8 + waited.as_millis() as u64;
        let confidence = 0.5 + 0.45 * unit_hash(prompt, params);

        Ok(InferenceOutput {
            text,
            latency_ms,
            token_count,
            cost_usd: token_count as f64 / 1000.0 * self.cost_per_1k_tokens,
            confidence: Some(confidence),
        })
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deterministic_output() {
        let backend = SimulatedBackend::new();
        let params = InferenceParams::new("coder");
        let a = backend.execute("Implement quicksort in Rust", &params).await.unwrap();
        let b = backend.execute("Implement quicksort in Rust", &params).await.unwrap();
        assert_eq!(a, b);
        assert!(a.text.contains("quicksort"));
        assert!(a.confidence.unwrap() >= 0.5 && a.confidence.unwrap() < 0.95);
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_fail_first() {
        let backend = SimulatedBackend::new().fail_first(1);
        let params = InferenceParams::default();
        assert!(backend.execute("hello world", &params).await.is_err());
        assert!(backend.execute("hello world", &params).await.is_ok());
    }

    #[tokio::test]
    async fn test_framing_fault() {
        let backend = SimulatedBackend::new().with_fault("critic", Fault::Fail);
        let ok = InferenceParams::default().with_framing("Be concise.");
        let bad = InferenceParams::default().with_framing("Act as a critic.");
        assert!(backend.execute("text here", &ok).await.is_ok());
        assert!(matches!(
            backend.execute("text here", &bad).await,
            Err(Error::BackendUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_word_budget_limits_output() {
        let backend = SimulatedBackend::new().with_word_budget(2);
        let out = backend
            .execute("alpha bravo charlie delta", &InferenceParams::new("a"))
            .await
            .unwrap();
        assert_eq!(out.text, "[a] alpha bravo");
    }
}
