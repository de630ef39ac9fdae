//! Agent profiles as loaded from configuration

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::rules::{BonusRule, Predicate};
use crate::classify::TaskType;
use crate::error::{Error, Result};

/// Agent profile as written in the config file
///
/// Task types are string keys so the table reads naturally in TOML;
/// [`AgentProfile::from_config`] validates them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfileConfig {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub task_type_affinity: BTreeMap<String, f64>,
    #[serde(default)]
    pub keyword_weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub base_priority: f64,
    #[serde(default)]
    pub bonus_rules: Vec<BonusRule>,
}

/// Validated, read-only agent profile
#[derive(Debug, Clone, PartialEq)]
pub struct AgentProfile {
    pub id: String,
    pub display_name: String,
    pub capabilities: BTreeSet<String>,
    pub task_type_affinity: HashMap<TaskType, f64>,
    /// Sorted by keyword so score reasons come out in a stable order
    pub keyword_weights: Vec<(String, f64)>,
    pub base_priority: f64,
    pub bonus_rules: Vec<BonusRule>,
}

impl AgentProfile {
    /// Validate a config entry. Weights must be finite and non-negative.
    pub fn from_config(config: &AgentProfileConfig) -> Result<Self> {
        if config.id.trim().is_empty() {
            return Err(Error::ConfigError("agent profile id is empty".to_string()));
        }

        let check = |what: &str, w: f64| -> Result<()> {
            if !w.is_finite() || w < 0.0 {
                return Err(Error::ConfigError(format!(
                    "agent '{}': {} weight must be non-negative, got {}",
                    config.id, what, w
                )));
            }
            Ok(())
        };

        let mut task_type_affinity = HashMap::new();
        for (key, weight) in &config.task_type_affinity {
            let task_type: TaskType = key
                .parse()
                .map_err(|e: String| Error::ConfigError(format!("agent '{}': {}", config.id, e)))?;
            check("affinity", *weight)?;
            task_type_affinity.insert(task_type, *weight);
        }

        let mut keyword_weights = Vec::with_capacity(config.keyword_weights.len());
        for (keyword, weight) in &config.keyword_weights {
            check("keyword", *weight)?;
            keyword_weights.push((keyword.to_lowercase(), *weight));
        }

        check("base_priority", config.base_priority)?;
        for rule in &config.bonus_rules {
            check("bonus", rule.bonus)?;
        }

        Ok(Self {
            id: config.id.clone(),
            display_name: config.display_name.clone(),
            capabilities: config.capabilities.iter().cloned().collect(),
            task_type_affinity,
            keyword_weights,
            base_priority: config.base_priority,
            bonus_rules: config.bonus_rules.clone(),
        })
    }

    pub fn affinity(&self, task_type: TaskType) -> Option<f64> {
        self.task_type_affinity.get(&task_type).copied()
    }
}

fn profile(
    id: &str,
    display_name: &str,
    capabilities: &[&str],
    affinity: &[(TaskType, f64)],
    keywords: &[(&str, f64)],
    base_priority: f64,
    bonus_rules: Vec<BonusRule>,
) -> AgentProfileConfig {
    AgentProfileConfig {
        id: id.to_string(),
        display_name: display_name.to_string(),
        capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        task_type_affinity: affinity.iter().map(|(t, w)| (t.to_string(), *w)).collect(),
        keyword_weights: keywords.iter().map(|(k, w)| (k.to_string(), *w)).collect(),
        base_priority,
        bonus_rules,
    }
}

fn terms(list: &[&str]) -> Vec<String> {
    list.iter().map(|t| t.to_string()).collect()
}

/// Profile set shipped with the default configuration
pub fn default_profiles() -> Vec<AgentProfileConfig> {
    vec![
        profile(
            "analyst",
            "Data Analyst",
            &["analysis", "statistics", "visualization"],
            &[(TaskType::Analysis, 1.0), (TaskType::Research, 0.4)],
            &[("compare", 0.2), ("data", 0.2), ("metric", 0.3), ("trend", 0.3)],
            4.0,
            vec![BonusRule::new(
                "quantitative",
                Predicate::MentionsAny {
                    terms: terms(&["statistic", "regression", "percentile", "correlation", "dataset"]),
                },
                0.2,
            )],
        ),
        profile(
            "architect",
            "Systems Architect",
            &["system-design", "distributed-systems", "code-review"],
            &[
                (TaskType::CodeGeneration, 0.6),
                (TaskType::Planning, 0.7),
                (TaskType::Analysis, 0.4),
            ],
            &[
                ("architecture", 0.4),
                ("distributed", 0.3),
                ("microservice", 0.3),
                ("scalability", 0.2),
                ("system design", 0.4),
            ],
            4.0,
            vec![BonusRule::new(
                "distributed_systems",
                Predicate::All {
                    predicates: vec![
                        Predicate::MentionsAtLeast {
                            terms: terms(&[
                                "distributed",
                                "microservice",
                                "load balancing",
                                "service discovery",
                                "fault tolerance",
                                "consensus",
                                "replication",
                                "chaos",
                            ]),
                            count: 2,
                        },
                        Predicate::ComplexityAtLeast { threshold: 0.6 },
                    ],
                },
                0.5,
            )],
        ),
        profile(
            "coder",
            "Software Engineer",
            &["coding", "debugging", "testing"],
            &[(TaskType::CodeGeneration, 1.0), (TaskType::Analysis, 0.2)],
            &[
                ("bug", 0.2),
                ("debug", 0.3),
                ("function", 0.2),
                ("implement", 0.3),
                ("refactor", 0.3),
            ],
            5.0,
            vec![BonusRule::new(
                "named_language",
                Predicate::MentionsAny {
                    terms: terms(&["rust", "python", "typescript", "javascript", "java", "golang"]),
                },
                0.2,
            )],
        ),
        profile(
            "generalist",
            "Generalist",
            &["conversation"],
            &[
                (TaskType::General, 1.0),
                (TaskType::CodeGeneration, 0.3),
                (TaskType::Analysis, 0.3),
                (TaskType::Creative, 0.3),
                (TaskType::Research, 0.3),
                (TaskType::Planning, 0.3),
            ],
            &[],
            1.0,
            vec![],
        ),
        profile(
            "planner",
            "Project Planner",
            &["planning", "estimation"],
            &[(TaskType::Planning, 1.0), (TaskType::Research, 0.2)],
            &[("milestone", 0.3), ("roadmap", 0.3), ("schedule", 0.2), ("timeline", 0.2)],
            3.0,
            vec![BonusRule::new(
                "complex_plan",
                Predicate::All {
                    predicates: vec![
                        Predicate::TaskTypeIs {
                            task_type: TaskType::Planning,
                        },
                        Predicate::ComplexityAtLeast { threshold: 0.5 },
                    ],
                },
                0.3,
            )],
        ),
        profile(
            "researcher",
            "Researcher",
            &["research", "summarization", "citation"],
            &[(TaskType::Research, 1.0), (TaskType::Analysis, 0.3)],
            &[("citation", 0.3), ("literature", 0.3), ("paper", 0.3), ("source", 0.2)],
            3.0,
            vec![],
        ),
        profile(
            "writer",
            "Creative Writer",
            &["writing", "storytelling"],
            &[(TaskType::Creative, 1.0)],
            &[("blog", 0.2), ("poem", 0.3), ("story", 0.3), ("tone", 0.2)],
            3.0,
            vec![],
        ),
    ]
}
