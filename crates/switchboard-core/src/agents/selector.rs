//! Agent selection - score every profile against a classified task
//!
//! Scoring is a pure function of the task and the (read-only) profile set:
//!
//! ```text
//! score = affinity(task_type)
//!       + Σ keyword weights hit
//!       + base_priority × priority_scale
//!       + Σ bonus where predicate(task)
//! ```
//!
//! The highest score wins, ties go to the lowest agent id.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::profile::{AgentProfile, AgentProfileConfig, default_profiles};
use crate::classify::{Task, TextFeatures};
use crate::error::{Error, Result};

/// Reasoning mode decided alongside the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningMode {
    Standard,
    Parallel,
}

impl std::fmt::Display for ReasoningMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Parallel => write!(f, "parallel"),
        }
    }
}

/// One contribution to a profile's score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReason {
    pub rule: String,
    pub weight: f64,
}

/// Outcome of agent selection for one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionResult {
    pub agent_id: String,
    pub score: f64,
    /// Contributions in evaluation order: affinity, keywords, priority, bonuses
    pub reasons: Vec<ScoreReason>,
    pub mode: ReasoningMode,
    pub fallback_used: bool,
}

/// Selector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Complexity at or above which tasks use parallel reasoning
    pub exploration_threshold: f64,
    /// Multiplier applied to each profile's base priority
    pub priority_scale: f64,
    /// Agent used when no profile is available or the chosen agent fails
    pub default_agent: String,
    pub profiles: Vec<AgentProfileConfig>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            exploration_threshold: 0.6,
            priority_scale: 0.1,
            default_agent: "generalist".to_string(),
            profiles: default_profiles(),
        }
    }
}

/// Maps classified tasks to agent profiles
#[derive(Debug, Clone)]
pub struct AgentSelector {
    exploration_threshold: f64,
    priority_scale: f64,
    default_agent: String,
    /// Sorted by id
    profiles: Vec<AgentProfile>,
}

impl AgentSelector {
    /// Build a selector, validating every profile
    pub fn new(config: &SelectorConfig) -> Result<Self> {
        if !(0.0..=1.0).contains(&config.exploration_threshold) {
            return Err(Error::ConfigError(format!(
                "selector.exploration_threshold must be within [0, 1], got {}",
                config.exploration_threshold
            )));
        }
        if !config.priority_scale.is_finite() || config.priority_scale < 0.0 {
            return Err(Error::ConfigError(
                "selector.priority_scale must be non-negative".to_string(),
            ));
        }

        let mut profiles = config
            .profiles
            .iter()
            .map(AgentProfile::from_config)
            .collect::<Result<Vec<_>>>()?;
        profiles.sort_by(|a, b| a.id.cmp(&b.id));
        if profiles.windows(2).any(|w| w[0].id == w[1].id) {
            return Err(Error::ConfigError("duplicate agent profile id".to_string()));
        }

        Ok(Self {
            exploration_threshold: config.exploration_threshold,
            priority_scale: config.priority_scale,
            default_agent: config.default_agent.clone(),
            profiles,
        })
    }

    pub fn profiles(&self) -> &[AgentProfile] {
        &self.profiles
    }

    pub fn default_agent(&self) -> &str {
        &self.default_agent
    }

    /// Look up a profile by id
    pub fn profile(&self, agent_id: &str) -> Result<&AgentProfile> {
        self.profiles
            .iter()
            .find(|p| p.id == agent_id)
            .ok_or_else(|| Error::NoSuitableAgent(agent_id.to_string()))
    }

    /// Reasoning mode for a complexity score
    pub fn mode_for(&self, complexity: f64) -> ReasoningMode {
        if complexity >= self.exploration_threshold {
            ReasoningMode::Parallel
        } else {
            ReasoningMode::Standard
        }
    }

    /// Select the best agent for a task
    pub fn select(&self, task: &Task) -> SelectionResult {
        let mode = self.mode_for(task.complexity_score);
        let text = TextFeatures::new(&task.raw_text);

        let mut best: Option<(&AgentProfile, f64, Vec<ScoreReason>)> = None;
        for profile in &self.profiles {
            let (score, reasons) = self.score(profile, task, &text);
            // profiles are sorted by id, so strict comparison keeps the lowest id on ties
            let better = match &best {
                Some((_, best_score, _)) => score > *best_score,
                None => true,
            };
            if better {
                best = Some((profile, score, reasons));
            }
        }

        match best {
            Some((profile, score, reasons)) => {
                debug!(
                    agent = %profile.id,
                    score = score,
                    mode = %mode,
                    task_type = %task.task_type,
                    "Selected agent"
                );
                SelectionResult {
                    agent_id: profile.id.clone(),
                    score,
                    reasons,
                    mode,
                    fallback_used: false,
                }
            }
            None => {
                warn!(default = %self.default_agent, "No agent profiles loaded, using default agent");
                self.fallback(mode)
            }
        }
    }

    /// Selection pointing at the designated default agent
    pub fn fallback(&self, mode: ReasoningMode) -> SelectionResult {
        SelectionResult {
            agent_id: self.default_agent.clone(),
            score: 0.0,
            reasons: vec![ScoreReason {
                rule: "default_agent".to_string(),
                weight: 0.0,
            }],
            mode,
            fallback_used: true,
        }
    }

    fn score(
        &self,
        profile: &AgentProfile,
        task: &Task,
        text: &TextFeatures,
    ) -> (f64, Vec<ScoreReason>) {
        let mut reasons = Vec::new();

        if let Some(weight) = profile.affinity(task.task_type) {
            reasons.push(ScoreReason {
                rule: format!("affinity:{}", task.task_type),
                weight,
            });
        }

        for (keyword, weight) in &profile.keyword_weights {
            if text.mentions(keyword) {
                reasons.push(ScoreReason {
                    rule: format!("keyword:{}", keyword),
                    weight: *weight,
                });
            }
        }

        reasons.push(ScoreReason {
            rule: "priority".to_string(),
            weight: profile.base_priority * self.priority_scale,
        });

        for rule in &profile.bonus_rules {
            if rule.predicate.evaluate(task, text) {
                reasons.push(ScoreReason {
                    rule: format!("bonus:{}", rule.name),
                    weight: rule.bonus,
                });
            }
        }

        let score = reasons.iter().map(|r| r.weight).sum();
        (score, reasons)
    }
}
