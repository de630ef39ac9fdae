//! Reasoning path types and configuration

use serde::{Deserialize, Serialize};

/// How one reasoning attempt diverges from the others
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathVariant {
    pub temperature: f32,
    pub framing: String,
}

impl PathVariant {
    pub fn new(temperature: f32, framing: impl Into<String>) -> Self {
        Self {
            temperature,
            framing: framing.into(),
        }
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    /// Number of concurrent paths (at least 2)
    pub fan_out: usize,
    /// Bound on total wall-clock time for the fan-out
    pub coordinator_timeout_ms: u64,
    /// Confidence gap under which the faster path wins
    pub tie_epsilon: f64,
    /// Variants assigned to paths in order, cycled when fan_out exceeds them
    pub variants: Vec<PathVariant>,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            fan_out: 3,
            coordinator_timeout_ms: 30_000,
            tie_epsilon: 0.02,
            variants: vec![
                PathVariant::new(
                    0.2,
                    "Work through the problem methodically, one step at a time.",
                ),
                PathVariant::new(
                    0.7,
                    "Consider two alternative approaches before committing to one.",
                ),
                PathVariant::new(
                    1.0,
                    "Draft an answer, critique it, then give an improved final answer.",
                ),
            ],
        }
    }
}

impl ReasoningConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.fan_out < 2 {
            return Err("reasoning.fan_out must be at least 2".to_string());
        }
        if self.coordinator_timeout_ms == 0 {
            return Err("reasoning.coordinator_timeout_ms must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.tie_epsilon) {
            return Err("reasoning.tie_epsilon must be within [0, 1]".to_string());
        }
        Ok(())
    }

    /// Variants for each of the `fan_out` paths
    pub fn path_variants(&self) -> Vec<PathVariant> {
        let fan_out = self.fan_out.max(2);
        if self.variants.is_empty() {
            return (0..fan_out)
                .map(|i| PathVariant::new(0.3 + 0.3 * i as f32, String::new()))
                .collect();
        }
        (0..fan_out)
            .map(|i| {
                let base = &self.variants[i % self.variants.len()];
                // later cycles run slightly hotter so repeated framings still diverge
                let round = (i / self.variants.len()) as f32;
                PathVariant::new((base.temperature + 0.1 * round).min(2.0), base.framing.clone())
            })
            .collect()
    }
}

/// A completed reasoning attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningPath {
    pub path_id: usize,
    pub variant: PathVariant,
    pub partial_transcript: String,
    /// Within [0, 1]
    pub confidence: f64,
    pub wall_time_ms: u64,
    pub latency_ms: u64,
    pub token_count: u32,
    pub cost_usd: f64,
}

/// A path that errored or was abandoned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathFailure {
    pub path_id: usize,
    pub error: String,
}

/// Result of one coordinator invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningOutcome {
    pub best: ReasoningPath,
    pub paths_attempted: usize,
    pub paths_succeeded: usize,
    pub failures: Vec<PathFailure>,
    /// All paths failed and a single standard call answered instead
    pub fallback_used: bool,
    /// Stopped joining because the coordinator timeout or caller deadline hit
    pub timed_out: bool,
    /// Cost of every completed call, including losing paths
    pub total_cost_usd: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = ReasoningConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.path_variants().len(), 3);
    }

    #[test]
    fn test_fan_out_below_two_rejected() {
        let config = ReasoningConfig {
            fan_out: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(config.path_variants().len(), 2);
    }

    #[test]
    fn test_variants_cycle_with_hotter_temperature() {
        let config = ReasoningConfig {
            fan_out: 5,
            ..Default::default()
        };
        let variants = config.path_variants();
        assert_eq!(variants.len(), 5);
        assert_eq!(variants[3].framing, variants[0].framing);
        assert!(variants[3].temperature > variants[0].temperature);
    }
}
