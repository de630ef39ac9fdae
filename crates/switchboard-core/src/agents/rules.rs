//! Declarative specialization rules
//!
//! Bonus rules are plain data loaded from configuration. A [`Predicate`]
//! is evaluated against a classified task without side effects.

use serde::{Deserialize, Serialize};

use crate::classify::{Task, TaskType, TextFeatures};

/// Condition over a classified task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    /// Text mentions at least one of the terms
    MentionsAny { terms: Vec<String> },
    /// Text mentions at least `count` distinct terms
    MentionsAtLeast { terms: Vec<String>, count: usize },
    /// Complexity score is at or above the threshold
    ComplexityAtLeast { threshold: f64 },
    /// Task was classified as the given type
    TaskTypeIs { task_type: TaskType },
    /// Every nested predicate holds
    All { predicates: Vec<Predicate> },
}

impl Predicate {
    pub fn evaluate(&self, task: &Task, text: &TextFeatures) -> bool {
        match self {
            Self::MentionsAny { terms } => terms.iter().any(|t| text.mentions(t)),
            Self::MentionsAtLeast { terms, count } => {
                terms.iter().filter(|t| text.mentions(t)).count() >= *count
            }
            Self::ComplexityAtLeast { threshold } => task.complexity_score >= *threshold,
            Self::TaskTypeIs { task_type } => task.task_type == *task_type,
            Self::All { predicates } => predicates.iter().all(|p| p.evaluate(task, text)),
        }
    }
}

/// Named bonus applied when its predicate holds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BonusRule {
    pub name: String,
    pub predicate: Predicate,
    pub bonus: f64,
}

impl BonusRule {
    pub fn new(name: impl Into<String>, predicate: Predicate, bonus: f64) -> Self {
        Self {
            name: name.into(),
            predicate,
            bonus,
        }
    }
}
