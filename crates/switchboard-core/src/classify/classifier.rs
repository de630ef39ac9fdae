//! Keyword-voting task classifier with a bounded complexity estimate

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::text::TextFeatures;
use super::types::{Classification, ComplexitySignals, TaskType};

/// Keyword set voting for one task type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeKeywords {
    pub task_type: TaskType,
    pub keywords: Vec<String>,
}

impl TypeKeywords {
    fn new(task_type: TaskType, keywords: &[&str]) -> Self {
        Self {
            task_type,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Classifier configuration: keyword sets, markers and signal weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub type_keywords: Vec<TypeKeywords>,
    pub technical_keywords: Vec<String>,
    /// Raw markers counted as compound requirements, matched with their spacing
    pub compound_markers: Vec<String>,
    pub length_weight: f64,
    pub technical_weight: f64,
    pub compound_weight: f64,
    /// Character count at which the length signal saturates
    pub length_saturation: usize,
    /// Distinct technical keywords at which the technical signal saturates
    pub technical_saturation: usize,
    /// Compound markers at which the compound signal saturates
    pub compound_saturation: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            type_keywords: vec![
                TypeKeywords::new(
                    TaskType::CodeGeneration,
                    &[
                        "implement", "code", "function", "refactor", "debug", "bug", "compile",
                        "algorithm", "script", "program", "api", "endpoint", "unit test",
                        "write a class", "fix the",
                    ],
                ),
                TypeKeywords::new(
                    TaskType::Analysis,
                    &[
                        "analyze", "analyse", "analysis", "compare", "evaluate", "assess", "trend",
                        "metric", "statistic", "benchmark", "root cause", "explain why",
                    ],
                ),
                TypeKeywords::new(
                    TaskType::Creative,
                    &[
                        "story", "poem", "creative", "imagine", "slogan", "lyric", "narrative",
                        "fiction", "brainstorm", "tagline",
                    ],
                ),
                TypeKeywords::new(
                    TaskType::Research,
                    &[
                        "research", "investigate", "survey", "literature", "source", "citation",
                        "history of", "state of the art", "find out", "paper",
                    ],
                ),
                TypeKeywords::new(
                    TaskType::Planning,
                    &[
                        "plan", "roadmap", "schedule", "milestone", "strategy", "timeline",
                        "prioritize", "prioritise", "organize", "itinerary",
                    ],
                ),
            ],
            technical_keywords: [
                "distributed", "microservice", "architecture", "load balancing",
                "service discovery", "fault tolerance", "fault-tolerant", "scalability",
                "scalable", "concurrency", "concurrent", "consensus", "replication", "sharding",
                "kubernetes", "caching", "latency", "throughput", "encryption",
                "authentication", "database", "transaction", "asynchronous", "event-driven",
                "real-time", "pipeline", "orchestration", "high availability", "message queue",
                "rate limiting", "observability",
            ]
            .iter()
            .map(|k| k.to_string())
            .collect(),
            compound_markers: [" and ", " with ", ", ", " as well as ", " plus ", "; "]
                .iter()
                .map(|k| k.to_string())
                .collect(),
            length_weight: 0.25,
            technical_weight: 0.5,
            compound_weight: 0.25,
            length_saturation: 400,
            technical_saturation: 4,
            compound_saturation: 3,
        }
    }
}

impl ClassifierConfig {
    /// Check weights and saturation points
    pub fn validate(&self) -> Result<(), String> {
        for (name, w) in [
            ("length_weight", self.length_weight),
            ("technical_weight", self.technical_weight),
            ("compound_weight", self.compound_weight),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(format!("classifier.{} must be non-negative", name));
            }
        }
        if self.length_saturation == 0
            || self.technical_saturation == 0
            || self.compound_saturation == 0
        {
            return Err("classifier saturation points must be positive".to_string());
        }
        Ok(())
    }
}

/// Classifies raw task text into a [`TaskType`] and a complexity score in [0, 1]
#[derive(Debug, Clone, Default)]
pub struct ComplexityClassifier {
    config: ClassifierConfig,
}

impl ComplexityClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Classify a piece of text. Never fails; empty text is `General` with zero complexity.
    pub fn classify(&self, text: &str) -> Classification {
        let features = TextFeatures::new(text);
        if features.is_empty() {
            return Classification {
                task_type: TaskType::General,
                complexity_score: 0.0,
                signals: ComplexitySignals::default(),
            };
        }

        let type_votes = self.type_votes(&features);
        let task_type = Self::winning_type(&type_votes);

        let technical_terms: Vec<String> = self
            .config
            .technical_keywords
            .iter()
            .filter(|k| features.mentions(k))
            .cloned()
            .collect();

        let compound_markers: usize = self
            .config
            .compound_markers
            .iter()
            .map(|m| features.count_marker(m))
            .sum();

        let signals = ComplexitySignals {
            length_chars: features.char_len(),
            technical_terms,
            compound_markers,
            type_votes,
        };
        let complexity_score = self.complexity(&signals);

        debug!(
            task_type = %task_type,
            complexity = complexity_score,
            technical = signals.technical_terms.len(),
            compound = signals.compound_markers,
            "Classified task"
        );

        Classification {
            task_type,
            complexity_score,
            signals,
        }
    }

    fn type_votes(&self, features: &TextFeatures) -> Vec<(TaskType, usize)> {
        let mut votes: Vec<(TaskType, usize)> = Vec::new();
        for set in &self.config.type_keywords {
            let hits = set.keywords.iter().filter(|k| features.mentions(k)).count();
            if hits == 0 {
                continue;
            }
            match votes.iter_mut().find(|(t, _)| *t == set.task_type) {
                Some((_, count)) => *count += hits,
                None => votes.push((set.task_type, hits)),
            }
        }
        votes.sort_by_key(|(t, _)| t.priority_rank());
        votes
    }

    fn winning_type(votes: &[(TaskType, usize)]) -> TaskType {
        // votes are in priority order, so the first maximum wins ties
        let mut best: Option<(TaskType, usize)> = None;
        for &(task_type, count) in votes {
            match best {
                Some((_, best_count)) if count <= best_count => {}
                _ => best = Some((task_type, count)),
            }
        }
        best.map(|(t, _)| t).unwrap_or(TaskType::General)
    }

    fn complexity(&self, signals: &ComplexitySignals) -> f64 {
        let c = &self.config;
        let ratio = |value: usize, saturation: usize| -> f64 {
            (value as f64 / saturation.max(1) as f64).min(1.0)
        };

        let score = c.length_weight * ratio(signals.length_chars, c.length_saturation)
            + c.technical_weight * ratio(signals.technical_terms.len(), c.technical_saturation)
            + c.compound_weight * ratio(signals.compound_markers, c.compound_saturation);

        if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_is_general() {
        let classifier = ComplexityClassifier::default();
        for text in ["", "   ", "\n\t"] {
            let c = classifier.classify(text);
            assert_eq!(c.task_type, TaskType::General);
            assert_eq!(c.complexity_score, 0.0);
        }
    }

    #[test]
    fn test_simple_code_task() {
        let classifier = ComplexityClassifier::default();
        let c = classifier.classify("Implement quicksort");
        assert_eq!(c.task_type, TaskType::CodeGeneration);
        assert!(c.complexity_score < 0.1);
    }

    #[test]
    fn test_compound_technical_task_is_complex() {
        let classifier = ComplexityClassifier::default();
        let c = classifier.classify(
            "Implement a distributed microservices architecture with load balancing, \
             service discovery, and fault tolerance",
        );
        assert_eq!(c.task_type, TaskType::CodeGeneration);
        assert!(c.signals.technical_terms.len() >= 4);
        assert!(c.complexity_score >= 0.75, "got {}", c.complexity_score);
    }

    #[test]
    fn test_tie_uses_priority_order() {
        let classifier = ComplexityClassifier::default();
        // one planning vote, one research vote
        let c = classifier.classify("roadmap survey");
        assert_eq!(c.task_type, TaskType::Planning);
    }

    #[test]
    fn test_no_votes_is_general() {
        let classifier = ComplexityClassifier::default();
        let c = classifier.classify("hello there");
        assert_eq!(c.task_type, TaskType::General);
    }

    #[test]
    fn test_complexity_bounded_for_varied_inputs() {
        let classifier = ComplexityClassifier::default();
        let long = "distributed database with sharding, replication and consensus, ".repeat(50);
        let inputs = [
            "a",
            "!!!???",
            "analyse the trend of latency and throughput",
            long.as_str(),
            "写一首关于秋天的诗",
        ];
        for text in inputs {
            let c = classifier.classify(text);
            assert!((0.0..=1.0).contains(&c.complexity_score));
            assert!(TaskType::ALL.contains(&c.task_type));
        }
    }

    #[test]
    fn test_oversized_weights_still_clamped() {
        let config = ClassifierConfig {
            length_weight: 5.0,
            technical_weight: 5.0,
            compound_weight: 5.0,
            ..Default::default()
        };
        let classifier = ComplexityClassifier::new(config);
        let c = classifier.classify("distributed caching with sharding and replication");
        assert_eq!(c.complexity_score, 1.0);
    }

    #[test]
    fn test_validate_rejects_negative_weight() {
        let config = ClassifierConfig {
            technical_weight: -0.1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(ClassifierConfig::default().validate().is_ok());
    }
}
