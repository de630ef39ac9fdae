//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::agents::{AgentSelector, SelectorConfig};
use crate::classify::ClassifierConfig;
use crate::evolution::EvolutionConfig;
use crate::llm::RetryPolicy;
use crate::reasoning::ReasoningConfig;
use crate::retrieval::RetrievalConfig;
use crate::routing::BanditConfig;

/// Switchboard configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub resilience: ResilienceConfig,
    pub classifier: ClassifierConfig,
    pub selector: SelectorConfig,
    pub reasoning: ReasoningConfig,
    pub evolution: EvolutionConfig,
    pub bandit: BanditConfig,
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    #[serde(skip)]
    pub api_key: Option<String>,
    pub default_model: String,
    pub fallback_models: Vec<String>,
    /// OpenRouter when unset
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: usize,
    pub timeout_secs: u64,
    /// Used to price responses in USD
    pub cost_per_1k_tokens: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_model: "anthropic/claude-sonnet-4-20250514".to_string(),
            fallback_models: vec![
                "anthropic/claude-3-5-haiku-latest".to_string(),
                "openai/gpt-4o".to_string(),
            ],
            base_url: None,
            temperature: 0.7,
            max_tokens: 2048,
            timeout_secs: 120,
            cost_per_1k_tokens: 0.003,
        }
    }
}

/// Timeouts and retry behaviour around every backend call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub attempt_timeout_ms: u64,
    pub retry_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Whole-request budget; in-flight work is cancelled when it expires
    pub request_deadline_ms: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: 10_000,
            retry_backoff_ms: 200,
            max_backoff_ms: 2_000,
            request_deadline_ms: 60_000,
        }
    }
}

impl ResilienceConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempt_timeout_ms: self.attempt_timeout_ms,
            backoff_ms: self.retry_backoff_ms,
            max_backoff_ms: self.max_backoff_ms,
            max_attempts: 2,
        }
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.request_deadline_ms)
    }
}

impl LlmConfig {
    pub fn resolved_api_key(&self) -> anyhow::Result<Option<String>> {
        self.enforce_env_only()?;

        Ok(env::var("SWITCHBOARD_API_KEY")
            .or_else(|_| env::var("OPENROUTER_API_KEY"))
            .ok()
            .filter(|key| !key.trim().is_empty()))
    }

    pub fn redacted_api_key(&self) -> anyhow::Result<Option<String>> {
        self.resolved_api_key().map(|opt| opt.map(|key| redact(&key)))
    }

    pub fn enforce_env_only(&self) -> anyhow::Result<()> {
        if self.api_key.is_some() {
            return Err(anyhow!(
                "LLM API keys must be provided via environment variables, not stored in configuration"
            ));
        }
        Ok(())
    }
}

fn redact(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 4 {
        "***".to_string()
    } else {
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("***{}", suffix)
    }
}

const KEYS: &[&str] = &[
    "llm.default_model",
    "llm.fallback_models",
    "llm.base_url",
    "llm.temperature",
    "llm.max_tokens",
    "llm.timeout_secs",
    "llm.cost_per_1k_tokens",
    "llm.api_key",
    "resilience.attempt_timeout_ms",
    "resilience.retry_backoff_ms",
    "resilience.request_deadline_ms",
    "selector.exploration_threshold",
    "selector.priority_scale",
    "selector.default_agent",
    "reasoning.fan_out",
    "reasoning.coordinator_timeout_ms",
    "reasoning.tie_epsilon",
    "evolution.population_size",
    "evolution.tournament_size",
    "evolution.elite_count",
    "evolution.mutation_rate",
    "evolution.crossover_rate",
    "evolution.max_generations",
    "evolution.patience",
    "evolution.evaluation_concurrency",
    "evolution.promote_top",
    "bandit.success_threshold",
    "bandit.retire_floor",
    "bandit.min_pulls_before_retire",
    "bandit.max_arms",
    "bandit.rollout_initial_fraction",
    "retrieval.default_k",
    "retrieval.max_k",
    "retrieval.rerank_top_m",
    "retrieval.cache_ttl_secs",
];

fn parse<T>(key: &str, value: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow!("Invalid value for {}: {} ({})", key, value, e))
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("SWITCHBOARD_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("switchboard")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// SQLite file holding bandit arms and genomes
    pub fn database_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("switchboard.db"))
    }

    /// Load configuration from file, or the defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config = Self::from_toml(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate every section
    pub fn validate(&self) -> anyhow::Result<()> {
        self.llm.enforce_env_only()?;

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(anyhow!("llm.temperature must be between 0.0 and 2.0"));
        }
        if self.llm.cost_per_1k_tokens < 0.0 {
            return Err(anyhow!("llm.cost_per_1k_tokens must be non-negative"));
        }
        if self.resilience.attempt_timeout_ms == 0 || self.resilience.request_deadline_ms == 0 {
            return Err(anyhow!("resilience timeouts must be positive"));
        }

        self.classifier.validate().map_err(|e| anyhow!(e))?;
        AgentSelector::new(&self.selector)?;
        self.reasoning.validate().map_err(|e| anyhow!(e))?;
        self.evolution.validate().map_err(|e| anyhow!(e))?;
        self.bandit.validate().map_err(|e| anyhow!(e))?;
        self.retrieval.validate().map_err(|e| anyhow!(e))?;
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        let value = match key {
            "llm.default_model" => self.llm.default_model.clone(),
            "llm.fallback_models" => self.llm.fallback_models.join(", "),
            "llm.base_url" => self
                .llm
                .base_url
                .clone()
                .unwrap_or_else(|| "(default: OpenRouter)".to_string()),
            "llm.temperature" => self.llm.temperature.to_string(),
            "llm.max_tokens" => self.llm.max_tokens.to_string(),
            "llm.timeout_secs" => self.llm.timeout_secs.to_string(),
            "llm.cost_per_1k_tokens" => self.llm.cost_per_1k_tokens.to_string(),

            "resilience.attempt_timeout_ms" => self.resilience.attempt_timeout_ms.to_string(),
            "resilience.retry_backoff_ms" => self.resilience.retry_backoff_ms.to_string(),
            "resilience.request_deadline_ms" => self.resilience.request_deadline_ms.to_string(),

            "selector.exploration_threshold" => self.selector.exploration_threshold.to_string(),
            "selector.priority_scale" => self.selector.priority_scale.to_string(),
            "selector.default_agent" => self.selector.default_agent.clone(),

            "reasoning.fan_out" => self.reasoning.fan_out.to_string(),
            "reasoning.coordinator_timeout_ms" => {
                self.reasoning.coordinator_timeout_ms.to_string()
            }
            "reasoning.tie_epsilon" => self.reasoning.tie_epsilon.to_string(),

            "evolution.population_size" => self.evolution.population_size.to_string(),
            "evolution.tournament_size" => self.evolution.tournament_size.to_string(),
            "evolution.elite_count" => self.evolution.elite_count.to_string(),
            "evolution.mutation_rate" => self.evolution.mutation_rate.to_string(),
            "evolution.crossover_rate" => self.evolution.crossover_rate.to_string(),
            "evolution.max_generations" => self.evolution.max_generations.to_string(),
            "evolution.patience" => self.evolution.patience.to_string(),
            "evolution.evaluation_concurrency" => {
                self.evolution.evaluation_concurrency.to_string()
            }
            "evolution.promote_top" => self.evolution.promote_top.to_string(),

            "bandit.success_threshold" => self.bandit.reward.success_threshold.to_string(),
            "bandit.retire_floor" => self.bandit.retire_floor.to_string(),
            "bandit.min_pulls_before_retire" => self.bandit.min_pulls_before_retire.to_string(),
            "bandit.max_arms" => self.bandit.max_arms.to_string(),
            "bandit.rollout_initial_fraction" => {
                self.bandit.rollout_initial_fraction.to_string()
            }

            "retrieval.default_k" => self.retrieval.default_k.to_string(),
            "retrieval.max_k" => self.retrieval.max_k.to_string(),
            "retrieval.rerank_top_m" => self.retrieval.rerank_top_m.to_string(),
            "retrieval.cache_ttl_secs" => self.retrieval.cache_ttl_secs.to_string(),

            // API key (special handling - show redacted)
            "llm.api_key" | "api_key" => match self.llm.redacted_api_key()? {
                Some(redacted) => redacted,
                None => {
                    "(not set - use SWITCHBOARD_API_KEY or OPENROUTER_API_KEY env var)".to_string()
                }
            },

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `switchboard config list` to see available keys.",
                    key
                ));
            }
        };
        Ok(value)
    }

    /// Set a configuration value by key.
    ///
    /// The change is applied only if the resulting configuration validates.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut next = self.clone();

        match key {
            "llm.default_model" => next.llm.default_model = value.trim().to_string(),
            "llm.fallback_models" => {
                next.llm.fallback_models = value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
            "llm.base_url" => {
                let value = value.trim();
                next.llm.base_url = (!value.is_empty()).then(|| value.to_string());
            }
            "llm.temperature" => next.llm.temperature = parse(key, value)?,
            "llm.max_tokens" => next.llm.max_tokens = parse(key, value)?,
            "llm.timeout_secs" => next.llm.timeout_secs = parse(key, value)?,
            "llm.cost_per_1k_tokens" => next.llm.cost_per_1k_tokens = parse(key, value)?,

            "resilience.attempt_timeout_ms" => {
                next.resilience.attempt_timeout_ms = parse(key, value)?
            }
            "resilience.retry_backoff_ms" => next.resilience.retry_backoff_ms = parse(key, value)?,
            "resilience.request_deadline_ms" => {
                next.resilience.request_deadline_ms = parse(key, value)?
            }

            "selector.exploration_threshold" => {
                next.selector.exploration_threshold = parse(key, value)?
            }
            "selector.priority_scale" => next.selector.priority_scale = parse(key, value)?,
            "selector.default_agent" => next.selector.default_agent = value.trim().to_string(),

            "reasoning.fan_out" => next.reasoning.fan_out = parse(key, value)?,
            "reasoning.coordinator_timeout_ms" => {
                next.reasoning.coordinator_timeout_ms = parse(key, value)?
            }
            "reasoning.tie_epsilon" => next.reasoning.tie_epsilon = parse(key, value)?,

            "evolution.population_size" => next.evolution.population_size = parse(key, value)?,
            "evolution.tournament_size" => next.evolution.tournament_size = parse(key, value)?,
            "evolution.elite_count" => next.evolution.elite_count = parse(key, value)?,
            "evolution.mutation_rate" => next.evolution.mutation_rate = parse(key, value)?,
            "evolution.crossover_rate" => next.evolution.crossover_rate = parse(key, value)?,
            "evolution.max_generations" => next.evolution.max_generations = parse(key, value)?,
            "evolution.patience" => next.evolution.patience = parse(key, value)?,
            "evolution.evaluation_concurrency" => {
                next.evolution.evaluation_concurrency = parse(key, value)?
            }
            "evolution.promote_top" => next.evolution.promote_top = parse(key, value)?,

            "bandit.success_threshold" => {
                next.bandit.reward.success_threshold = parse(key, value)?
            }
            "bandit.retire_floor" => next.bandit.retire_floor = parse(key, value)?,
            "bandit.min_pulls_before_retire" => {
                next.bandit.min_pulls_before_retire = parse(key, value)?
            }
            "bandit.max_arms" => next.bandit.max_arms = parse(key, value)?,
            "bandit.rollout_initial_fraction" => {
                next.bandit.rollout_initial_fraction = parse(key, value)?
            }

            "retrieval.default_k" => next.retrieval.default_k = parse(key, value)?,
            "retrieval.max_k" => next.retrieval.max_k = parse(key, value)?,
            "retrieval.rerank_top_m" => next.retrieval.rerank_top_m = parse(key, value)?,
            "retrieval.cache_ttl_secs" => next.retrieval.cache_ttl_secs = parse(key, value)?,

            // API key cannot be set via config
            "llm.api_key" | "api_key" => {
                return Err(anyhow!(
                    "API keys cannot be stored in configuration for security. \
                     Set the SWITCHBOARD_API_KEY or OPENROUTER_API_KEY environment variable instead."
                ));
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `switchboard config list` to see available keys.",
                    key
                ));
            }
        }

        next.validate()
            .with_context(|| format!("Rejected value for {}: {}", key, value))?;
        *self = next;
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        KEYS.iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}
