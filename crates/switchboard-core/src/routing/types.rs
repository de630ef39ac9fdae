//! Types for online prompt-variant serving

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One live genome under Thompson sampling
///
/// α and β never drop below 1 (the uniform prior).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanditArm {
    pub genome_id: String,
    /// Beta distribution alpha (1 + successes)
    pub alpha: f64,
    /// Beta distribution beta (1 + failures)
    pub beta: f64,
    /// Outcomes recorded against this arm, including discounted ones
    pub pulls: u64,
    pub cumulative_reward: f64,
    /// Outcomes that came from a degraded path and did not move the posterior
    pub discounted_pulls: u64,
    /// Share of sampled wins actually served while in rollout, in (0, 1]
    pub traffic_fraction: f64,
    pub promoted_at: DateTime<Utc>,
}

impl BanditArm {
    /// New arm with the uninformative prior Beta(1, 1)
    pub fn new(genome_id: impl Into<String>, traffic_fraction: f64) -> Self {
        Self {
            genome_id: genome_id.into(),
            alpha: 1.0,
            beta: 1.0,
            pulls: 0,
            cumulative_reward: 0.0,
            discounted_pulls: 0,
            traffic_fraction: traffic_fraction.clamp(0.0, 1.0),
            promoted_at: Utc::now(),
        }
    }

    /// Posterior mean of the success probability
    pub fn expected_value(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    /// Standard deviation of the Beta posterior
    pub fn uncertainty(&self) -> f64 {
        let ab = self.alpha + self.beta;
        ((self.alpha * self.beta) / (ab * ab * (ab + 1.0))).sqrt()
    }

    /// Mean reward over outcomes that moved the posterior
    pub fn mean_reward(&self) -> f64 {
        let counted = self.pulls.saturating_sub(self.discounted_pulls);
        if counted == 0 {
            0.0
        } else {
            self.cumulative_reward / counted as f64
        }
    }

    pub fn in_rollout(&self) -> bool {
        self.traffic_fraction < 1.0
    }

    /// Restore the Beta-prior floor after loading external state
    pub fn enforce_prior_floor(&mut self) {
        if !self.alpha.is_finite() || self.alpha < 1.0 {
            self.alpha = 1.0;
        }
        if !self.beta.is_finite() || self.beta < 1.0 {
            self.beta = 1.0;
        }
        self.traffic_fraction = self.traffic_fraction.clamp(0.0, 1.0);
    }
}

/// Observed result of serving one request with a genome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub genome_id: String,
    /// Quality in [0, 1]
    pub quality: f64,
    pub latency_ms: u64,
    pub cost_usd: f64,
    /// The response came from a degraded path
    pub fallback_used: bool,
}

/// Weights and budgets turning an outcome into a reward in [0, 1]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    pub quality_weight: f64,
    pub latency_weight: f64,
    pub cost_weight: f64,
    /// Latency at which the latency component is 0.5
    pub latency_budget_ms: u64,
    /// Cost at which the cost component is 0.5
    pub cost_budget_usd: f64,
    /// Reward at or above which an outcome counts as a success
    pub success_threshold: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            quality_weight: 0.6,
            latency_weight: 0.2,
            cost_weight: 0.2,
            latency_budget_ms: 2_000,
            cost_budget_usd: 0.01,
            success_threshold: 0.6,
        }
    }
}

impl RewardConfig {
    /// Weighted quality/latency/cost score, clamped to [0, 1]
    pub fn compute_reward(&self, outcome: &Outcome) -> f64 {
        let quality = if outcome.quality.is_finite() {
            outcome.quality.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let speed = 1.0 / (1.0 + outcome.latency_ms as f64 / self.latency_budget_ms.max(1) as f64);
        let cost = 1.0 / (1.0 + outcome.cost_usd.max(0.0) / self.cost_budget_usd.max(f64::EPSILON));

        let total = self.quality_weight + self.latency_weight + self.cost_weight;
        if total <= 0.0 {
            return quality;
        }
        let reward = (quality * self.quality_weight
            + speed * self.latency_weight
            + cost * self.cost_weight)
            / total;
        reward.clamp(0.0, 1.0)
    }

    pub fn is_success(&self, reward: f64) -> bool {
        reward >= self.success_threshold
    }
}

/// Policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BanditConfig {
    pub reward: RewardConfig,
    /// Posterior mean below which an arm is retired
    pub retire_floor: f64,
    /// Pulls required before an arm may be retired
    pub min_pulls_before_retire: u64,
    /// Upper bound on live arms
    pub max_arms: usize,
    /// Traffic fraction for newly promoted arms
    pub rollout_initial_fraction: f64,
    /// Increment applied every `rollout_interval` pulls
    pub rollout_step: f64,
    pub rollout_interval: u64,
    /// Fixed RNG seed for reproducible sampling
    pub seed: Option<u64>,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            reward: RewardConfig::default(),
            retire_floor: 0.2,
            min_pulls_before_retire: 30,
            max_arms: 8,
            rollout_initial_fraction: 0.1,
            rollout_step: 0.1,
            rollout_interval: 20,
            seed: None,
        }
    }
}

impl BanditConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.reward.success_threshold) {
            return Err("bandit.success_threshold must be within [0, 1]".to_string());
        }
        if !(0.0..=1.0).contains(&self.retire_floor) {
            return Err("bandit.retire_floor must be within [0, 1]".to_string());
        }
        if self.max_arms == 0 {
            return Err("bandit.max_arms must be at least 1".to_string());
        }
        if !(self.rollout_initial_fraction > 0.0 && self.rollout_initial_fraction <= 1.0) {
            return Err("bandit.rollout_initial_fraction must be within (0, 1]".to_string());
        }
        if self.rollout_step <= 0.0 || self.rollout_interval == 0 {
            return Err("bandit rollout step and interval must be positive".to_string());
        }
        Ok(())
    }
}

/// Why a genome was served
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    /// Won the Thompson draw
    Sampled,
    /// Won the draw but was still ramping up, so the default served instead
    RolloutDiverted,
    /// Sampling produced no winner, the default served
    DefaultFallback,
}

impl std::fmt::Display for SelectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sampled => write!(f, "sampled"),
            Self::RolloutDiverted => write!(f, "rollout_diverted"),
            Self::DefaultFallback => write!(f, "default_fallback"),
        }
    }
}

/// Genome chosen for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmSelection {
    pub genome_id: String,
    pub sampled_value: f64,
    pub reason: SelectionReason,
    pub fallback_used: bool,
}

/// Effect of recording an outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardUpdate {
    pub genome_id: String,
    pub reward: f64,
    pub success: bool,
    /// False when the outcome was discounted (fallback) and α/β did not move
    pub counted: bool,
    pub retired: bool,
}

/// Read-only per-arm projection for reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmStats {
    pub genome_id: String,
    pub pulls: u64,
    pub discounted_pulls: u64,
    pub alpha: f64,
    pub beta: f64,
    pub expected_value: f64,
    pub cumulative_reward: f64,
    pub mean_reward: f64,
    pub traffic_fraction: f64,
    pub is_default: bool,
}

impl ArmStats {
    pub fn from_arm(arm: &BanditArm, is_default: bool) -> Self {
        Self {
            genome_id: arm.genome_id.clone(),
            pulls: arm.pulls,
            discounted_pulls: arm.discounted_pulls,
            alpha: arm.alpha,
            beta: arm.beta,
            expected_value: arm.expected_value(),
            cumulative_reward: arm.cumulative_reward,
            mean_reward: arm.mean_reward(),
            traffic_fraction: arm.traffic_fraction,
            is_default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(quality: f64, latency_ms: u64, cost_usd: f64) -> Outcome {
        Outcome {
            genome_id: "g".to_string(),
            quality,
            latency_ms,
            cost_usd,
            fallback_used: false,
        }
    }

    #[test]
    fn test_new_arm_has_uniform_prior() {
        let arm = BanditArm::new("g1", 0.1);
        assert_eq!(arm.alpha, 1.0);
        assert_eq!(arm.beta, 1.0);
        assert_eq!(arm.expected_value(), 0.5);
        assert!(arm.in_rollout());
    }

    #[test]
    fn test_prior_floor_enforced() {
        let mut arm = BanditArm::new("g1", 1.0);
        arm.alpha = 0.2;
        arm.beta = f64::NAN;
        arm.enforce_prior_floor();
        assert_eq!(arm.alpha, 1.0);
        assert_eq!(arm.beta, 1.0);
    }

    #[test]
    fn test_reward_bounds_and_ordering() {
        let config = RewardConfig::default();
        let good = config.compute_reward(&outcome(0.9, 300, 0.001));
        let bad = config.compute_reward(&outcome(0.2, 8_000, 0.05));
        assert!(good > bad);
        assert!(config.is_success(good));
        assert!(!config.is_success(bad));
        for r in [good, bad, config.compute_reward(&outcome(f64::NAN, 0, -1.0))] {
            assert!((0.0..=1.0).contains(&r));
        }
    }

    #[test]
    fn test_mean_reward_ignores_discounted() {
        let mut arm = BanditArm::new("g1", 1.0);
        arm.pulls = 4;
        arm.discounted_pulls = 2;
        arm.cumulative_reward = 1.5;
        assert_eq!(arm.mean_reward(), 0.75);
    }

    #[test]
    fn test_bandit_config_validation() {
        assert!(BanditConfig::default().validate().is_ok());
        let config = BanditConfig {
            max_arms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
