//! Types produced by task classification

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed taxonomy of task types
///
/// `General` is the fallback for text that matches no keyword set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    CodeGeneration,
    Analysis,
    Creative,
    Research,
    Planning,
    General,
}

impl TaskType {
    /// Every task type, in declaration order
    pub const ALL: [TaskType; 6] = [
        TaskType::CodeGeneration,
        TaskType::Analysis,
        TaskType::Creative,
        TaskType::Research,
        TaskType::Planning,
        TaskType::General,
    ];

    /// Tie-break order for type voting, highest priority first
    pub const PRIORITY: [TaskType; 6] = [
        TaskType::CodeGeneration,
        TaskType::Analysis,
        TaskType::Planning,
        TaskType::Research,
        TaskType::Creative,
        TaskType::General,
    ];

    /// Position in the tie-break order (0 = highest priority)
    pub fn priority_rank(&self) -> usize {
        Self::PRIORITY
            .iter()
            .position(|t| t == self)
            .unwrap_or(Self::PRIORITY.len())
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CodeGeneration => write!(f, "code_generation"),
            Self::Analysis => write!(f, "analysis"),
            Self::Creative => write!(f, "creative"),
            Self::Research => write!(f, "research"),
            Self::Planning => write!(f, "planning"),
            Self::General => write!(f, "general"),
        }
    }
}

impl std::str::FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "code_generation" | "code" => Ok(Self::CodeGeneration),
            "analysis" => Ok(Self::Analysis),
            "creative" => Ok(Self::Creative),
            "research" => Ok(Self::Research),
            "planning" => Ok(Self::Planning),
            "general" => Ok(Self::General),
            _ => Err(format!("Unknown task type: {}", s)),
        }
    }
}

/// Signals that contributed to a classification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComplexitySignals {
    /// Character count of the trimmed input
    pub length_chars: usize,
    /// Distinct technical/structural keywords found
    pub technical_terms: Vec<String>,
    /// Number of conjunctions or list separators signalling compound requirements
    pub compound_markers: usize,
    /// Keyword votes per task type (only types with at least one vote)
    pub type_votes: Vec<(TaskType, usize)>,
}

/// Output of the classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub task_type: TaskType,
    /// Always within [0, 1]
    pub complexity_score: f64,
    pub signals: ComplexitySignals,
}

/// An incoming task, immutable once classified
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub raw_text: String,
    pub task_type: TaskType,
    pub complexity_score: f64,
    pub timestamp: DateTime<Utc>,
}

impl Task {
    /// Build a task from its text and classification
    pub fn new(raw_text: impl Into<String>, classification: &Classification) -> Self {
        Self {
            raw_text: raw_text.into(),
            task_type: classification.task_type,
            complexity_score: classification.complexity_score,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_type_roundtrip_display() {
        for task_type in TaskType::ALL {
            let parsed: TaskType = task_type.to_string().parse().unwrap();
            assert_eq!(parsed, task_type);
        }
        assert!("poetry".parse::<TaskType>().is_err());
    }

    #[test]
    fn test_priority_order() {
        assert!(TaskType::CodeGeneration.priority_rank() < TaskType::Analysis.priority_rank());
        assert!(TaskType::Planning.priority_rank() < TaskType::Research.priority_rank());
        assert!(TaskType::Creative.priority_rank() < TaskType::General.priority_rank());
    }

    #[test]
    fn test_task_type_serde_snake_case() {
        let json = serde_json::to_string(&TaskType::CodeGeneration).unwrap();
        assert_eq!(json, "\"code_generation\"");
    }
}
