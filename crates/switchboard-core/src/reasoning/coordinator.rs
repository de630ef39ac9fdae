//! Fan-out/fan-in over reasoning paths with partial-failure tolerance

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::types::{PathFailure, PathVariant, ReasoningConfig, ReasoningOutcome, ReasoningPath};
use crate::error::{Error, Result};
use crate::llm::{InferenceBackend, InferenceOutput, InferenceParams, RetryPolicy, call_with_retry};

const HEDGES: [&str; 6] = ["maybe", "not sure", "might", "unclear", "possibly", "i think"];

/// Confidence estimate for backends that do not self-report one.
///
/// Longer, committed answers score higher; hedging phrases lower the score.
pub fn heuristic_confidence(text: &str) -> f64 {
    let lower = text.to_lowercase();
    let words = lower.split_whitespace().count();
    if words == 0 {
        return 0.0;
    }
    let substance = (words as f64 / 60.0).min(1.0);
    let hedges = HEDGES.iter().filter(|h| lower.contains(*h)).count() as f64;
    (0.3 + 0.6 * substance - 0.1 * hedges).clamp(0.0, 1.0)
}

fn confidence_of(output: &InferenceOutput) -> f64 {
    match output.confidence {
        Some(c) if c.is_finite() => c.clamp(0.0, 1.0),
        _ => heuristic_confidence(&output.text),
    }
}

/// Runs best-of-N reasoning against one agent
#[derive(Clone)]
pub struct ParallelReasoningCoordinator {
    backend: Arc<dyn InferenceBackend>,
    config: ReasoningConfig,
    retry: RetryPolicy,
}

impl ParallelReasoningCoordinator {
    pub fn new(backend: Arc<dyn InferenceBackend>, config: ReasoningConfig) -> Self {
        Self {
            backend,
            config,
            retry: RetryPolicy::default(),
        }
    }

    /// Set the per-path timeout and retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &ReasoningConfig {
        &self.config
    }

    /// Fan out, join, and pick the most confident path.
    ///
    /// Abandoned paths are cancelled through a child of `token` and their
    /// tasks aborted. Returns `Err(Cancelled)` only when the caller's token
    /// fired before any path completed.
    pub async fn run(
        &self,
        prompt: &str,
        params: &InferenceParams,
        token: &CancellationToken,
    ) -> Result<ReasoningOutcome> {
        let variants = self.config.path_variants();
        let paths_attempted = variants.len();
        let child = token.child_token();
        let mut set = JoinSet::new();

        for (path_id, variant) in variants.into_iter().enumerate() {
            let backend = self.backend.clone();
            let prompt = prompt.to_string();
            let retry = self.retry;
            let child = child.clone();
            let mut path_params = params.clone();
            path_params.temperature = variant.temperature;
            path_params.framing = merge_framing(params.framing.as_deref(), &variant.framing);

            set.spawn(async move {
                let start = Instant::now();
                let result = call_with_retry(&retry, &child, "reasoning_path", || {
                    backend.execute(&prompt, &path_params)
                })
                .await;
                (path_id, variant, start.elapsed(), result)
            });
        }

        debug!(
            fan_out = paths_attempted,
            agent = %params.agent_id,
            "Spawned reasoning paths"
        );

        let deadline = Instant::now() + Duration::from_millis(self.config.coordinator_timeout_ms);
        let expiry = tokio::time::sleep_until(deadline);
        tokio::pin!(expiry);

        let mut paths = Vec::new();
        let mut failures = Vec::new();
        let mut timed_out = false;
        let mut cancelled = false;

        while !set.is_empty() {
            tokio::select! {
                _ = token.cancelled() => {
                    cancelled = true;
                    break;
                }
                _ = &mut expiry => {
                    timed_out = true;
                    break;
                }
                joined = set.join_next() => match joined {
                    Some(Ok((path_id, variant, elapsed, Ok(output)))) => {
                        paths.push(ReasoningPath {
                            path_id,
                            variant,
                            confidence: confidence_of(&output),
                            partial_transcript: output.text,
                            wall_time_ms: elapsed.as_millis() as u64,
                            latency_ms: output.latency_ms,
                            token_count: output.token_count,
                            cost_usd: output.cost_usd,
                        });
                    }
                    Some(Ok((path_id, _, _, Err(e)))) => {
                        warn!(path = path_id, error = %e, "Reasoning path failed");
                        failures.push(PathFailure { path_id, error: e.to_string() });
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Reasoning path task did not complete");
                        failures.push(PathFailure { path_id: usize::MAX, error: e.to_string() });
                    }
                    None => break,
                },
            }
        }

        // paths observe the child token, so they can all finish before the select sees it
        cancelled |= token.is_cancelled();

        if !set.is_empty() {
            let abandoned = set.len();
            child.cancel();
            set.abort_all();
            warn!(
                abandoned = abandoned,
                completed = paths.len(),
                cancelled = cancelled,
                "Reasoning fan-out stopped early"
            );
            for _ in 0..abandoned {
                failures.push(PathFailure {
                    path_id: usize::MAX,
                    error: if cancelled {
                        "cancelled".to_string()
                    } else {
                        "coordinator timeout".to_string()
                    },
                });
            }
        }

        let total_cost_usd: f64 = paths.iter().map(|p| p.cost_usd).sum();
        let paths_succeeded = paths.len();

        if let Some(best) = select_best(paths, self.config.tie_epsilon) {
            info!(
                path = best.path_id,
                confidence = best.confidence,
                succeeded = paths_succeeded,
                attempted = paths_attempted,
                "Selected reasoning path"
            );
            return Ok(ReasoningOutcome {
                best,
                paths_attempted,
                paths_succeeded,
                failures,
                fallback_used: false,
                timed_out: timed_out || cancelled,
                total_cost_usd,
            });
        }

        if cancelled {
            return Err(Error::Cancelled);
        }

        warn!(
            attempted = paths_attempted,
            "All reasoning paths failed, falling back to a standard call"
        );
        // the fallback shares the fan-out budget
        let start = Instant::now();
        let fallback = call_with_retry(&self.retry, token, "standard_fallback", || {
            self.backend.execute(prompt, params)
        });
        let output = tokio::time::timeout_at(deadline, fallback)
            .await
            .unwrap_or_else(|_| Err(Error::BackendTimeout("coordinator timeout".to_string())))
            .map_err(|e| {
                if matches!(e, Error::Cancelled) {
                    return e;
                }
                let mut reasons: Vec<String> = failures.iter().map(|f| f.error.clone()).collect();
                reasons.push(format!("fallback: {}", e));
                Error::ReasoningFailed(reasons.join("; "))
            })?;

        let best = ReasoningPath {
            path_id: paths_attempted,
            variant: PathVariant::new(params.temperature, params.framing.clone().unwrap_or_default()),
            confidence: confidence_of(&output),
            partial_transcript: output.text,
            wall_time_ms: start.elapsed().as_millis() as u64,
            latency_ms: output.latency_ms,
            token_count: output.token_count,
            cost_usd: output.cost_usd,
        };
        let total_cost_usd = best.cost_usd;

        Ok(ReasoningOutcome {
            best,
            paths_attempted,
            paths_succeeded: 0,
            failures,
            fallback_used: true,
            timed_out,
            total_cost_usd,
        })
    }
}

fn merge_framing(base: Option<&str>, variant: &str) -> Option<String> {
    match (base, variant.is_empty()) {
        (Some(b), false) => Some(format!("{} {}", b, variant)),
        (Some(b), true) => Some(b.to_string()),
        (None, false) => Some(variant.to_string()),
        (None, true) => None,
    }
}

/// Highest confidence wins; within `epsilon` of the top the fastest path wins
fn select_best(paths: Vec<ReasoningPath>, epsilon: f64) -> Option<ReasoningPath> {
    let top = paths
        .iter()
        .map(|p| p.confidence)
        .fold(f64::NEG_INFINITY, f64::max);

    paths
        .into_iter()
        .filter(|p| p.confidence >= top - epsilon)
        .min_by(|a, b| {
            a.wall_time_ms
                .cmp(&b.wall_time_ms)
                .then(b.confidence.total_cmp(&a.confidence))
                .then(a.path_id.cmp(&b.path_id))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Fault, SimulatedBackend};

    fn path(path_id: usize, confidence: f64, wall_time_ms: u64) -> ReasoningPath {
        ReasoningPath {
            path_id,
            variant: PathVariant::new(0.5, ""),
            partial_transcript: String::new(),
            confidence,
            wall_time_ms,
            latency_ms: wall_time_ms,
            token_count: 0,
            cost_usd: 0.0,
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            attempt_timeout_ms: 1_000,
            backoff_ms: 1,
            max_backoff_ms: 5,
            max_attempts: 2,
        }
    }

    #[test]
    fn test_select_best_prefers_confidence() {
        let best = select_best(vec![path(0, 0.6, 10), path(1, 0.9, 50)], 0.02).unwrap();
        assert_eq!(best.path_id, 1);
    }

    #[test]
    fn test_select_best_tie_prefers_faster() {
        let best = select_best(vec![path(0, 0.90, 80), path(1, 0.89, 20)], 0.02).unwrap();
        assert_eq!(best.path_id, 1);
        assert!(select_best(vec![], 0.02).is_none());
    }

    #[test]
    fn test_heuristic_confidence_bounds() {
        assert_eq!(heuristic_confidence(""), 0.0);
        let committed = heuristic_confidence(&"word ".repeat(80));
        let hedged = heuristic_confidence("maybe it might work, not sure, possibly unclear");
        assert!(committed > hedged);
        assert!((0.0..=1.0).contains(&hedged));
    }

    #[tokio::test(start_paused = true)]
    async fn test_paths_run_concurrently() {
        let backend = Arc::new(SimulatedBackend::new().with_delay(Duration::from_millis(100)));
        let coordinator = ParallelReasoningCoordinator::new(backend.clone(), ReasoningConfig::default())
            .with_retry(fast_retry());

        let start = Instant::now();
        let outcome = coordinator
            .run("Design a cache", &InferenceParams::new("architect"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.paths_attempted, 3);
        assert_eq!(outcome.paths_succeeded, 3);
        assert_eq!(backend.calls(), 3);
        assert!(start.elapsed() < Duration::from_millis(200));
        assert!(!outcome.fallback_used);
    }

    #[tokio::test]
    async fn test_partial_failure_excluded() {
        let backend = Arc::new(SimulatedBackend::new().with_fault("critique", Fault::Fail));
        let coordinator = ParallelReasoningCoordinator::new(backend, ReasoningConfig::default())
            .with_retry(fast_retry());

        let outcome = coordinator
            .run("Design a cache", &InferenceParams::new("architect"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.paths_succeeded, 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].path_id, 2);
        assert_ne!(outcome.best.path_id, 2);
        assert!(!outcome.fallback_used);
    }

    #[tokio::test]
    async fn test_all_paths_fail_uses_standard_call() {
        let backend = Arc::new(
            SimulatedBackend::new()
                .with_fault("step at a time", Fault::Fail)
                .with_fault("alternative approaches", Fault::Fail)
                .with_fault("critique", Fault::Fail),
        );
        let coordinator = ParallelReasoningCoordinator::new(backend, ReasoningConfig::default())
            .with_retry(fast_retry());

        let outcome = coordinator
            .run("Design a cache", &InferenceParams::new("architect"), &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.fallback_used);
        assert_eq!(outcome.paths_succeeded, 0);
        assert_eq!(outcome.failures.len(), 3);
    }

    #[tokio::test]
    async fn test_everything_failing_is_an_error() {
        let backend = Arc::new(SimulatedBackend::new().always_fail());
        let coordinator = ParallelReasoningCoordinator::new(backend, ReasoningConfig::default())
            .with_retry(fast_retry());

        let err = coordinator
            .run("Design a cache", &InferenceParams::new("architect"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "E301");
    }

    #[tokio::test(start_paused = true)]
    async fn test_coordinator_timeout_keeps_finished_paths() {
        let backend = Arc::new(
            SimulatedBackend::new()
                .with_fault("critique", Fault::Delay(Duration::from_secs(60))),
        );
        let config = ReasoningConfig {
            coordinator_timeout_ms: 500,
            ..Default::default()
        };
        let retry = RetryPolicy {
            attempt_timeout_ms: 120_000,
            ..fast_retry()
        };
        let coordinator = ParallelReasoningCoordinator::new(backend, config).with_retry(retry);

        let start = Instant::now();
        let outcome = coordinator
            .run("Design a cache", &InferenceParams::new("architect"), &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.timed_out);
        assert_eq!(outcome.paths_succeeded, 2);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_bounded_by_coordinator_timeout() {
        let backend = Arc::new(SimulatedBackend::new().with_delay(Duration::from_secs(8)));
        let config = ReasoningConfig {
            coordinator_timeout_ms: 500,
            ..Default::default()
        };
        let retry = RetryPolicy {
            attempt_timeout_ms: 5_000,
            ..fast_retry()
        };
        let coordinator = ParallelReasoningCoordinator::new(backend, config).with_retry(retry);

        let start = Instant::now();
        let err = coordinator
            .run("Design a cache", &InferenceParams::new("architect"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.code(), "E301");
        assert!(err.to_string().contains("fallback: Backend call timed out"));
        assert!(start.elapsed() < Duration::from_millis(600));
    }

    #[tokio::test]
    async fn test_cancelled_before_any_path_completes() {
        let backend = Arc::new(SimulatedBackend::new().with_delay(Duration::from_secs(30)));
        let coordinator = ParallelReasoningCoordinator::new(backend, ReasoningConfig::default())
            .with_retry(RetryPolicy {
                attempt_timeout_ms: 60_000,
                ..fast_retry()
            });
        let token = CancellationToken::new();
        token.cancel();

        let err = coordinator
            .run("Design a cache", &InferenceParams::new("architect"), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
