//! Golden dataset and rubric scoring

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::classify::TaskType;
use crate::error::{Error, Result};

/// Share of the rubric taken by expected-keyword coverage
const COVERAGE_WEIGHT: f64 = 0.7;

/// A task with a known good answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldenExample {
    pub id: String,
    pub task_type: TaskType,
    pub input: String,
    #[serde(default)]
    pub expected_keywords: Vec<String>,
    #[serde(default)]
    pub reference: String,
}

impl GoldenExample {
    pub fn new(
        id: impl Into<String>,
        task_type: TaskType,
        input: impl Into<String>,
        expected_keywords: &[&str],
        reference: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            task_type,
            input: input.into(),
            expected_keywords: expected_keywords.iter().map(|k| k.to_string()).collect(),
            reference: reference.into(),
        }
    }

    /// Rubric quality of a response in [0, 1]
    ///
    /// Keyword coverage blended with Jaccard overlap against the reference.
    /// Without expected keywords the Jaccard score stands alone.
    pub fn score(&self, response: &str) -> f64 {
        let response_tokens = token_set(response);
        let jaccard = jaccard_similarity(&token_set(&self.reference), &response_tokens);

        if self.expected_keywords.is_empty() {
            return jaccard;
        }

        let lowered = response.to_lowercase();
        let covered = self
            .expected_keywords
            .iter()
            .filter(|k| {
                let k = k.to_lowercase();
                response_tokens.contains(&k) || lowered.contains(&k)
            })
            .count();
        let coverage = covered as f64 / self.expected_keywords.len() as f64;

        (COVERAGE_WEIGHT * coverage + (1.0 - COVERAGE_WEIGHT) * jaccard).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldenDataset {
    pub examples: Vec<GoldenExample>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DatasetFile {
    Wrapped(GoldenDataset),
    Bare(Vec<GoldenExample>),
}

impl GoldenDataset {
    pub fn new(examples: Vec<GoldenExample>) -> Self {
        Self { examples }
    }

    /// Load a dataset from JSON, either `{"examples": [...]}` or a bare array
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
            .map_err(|e| Error::Validation(format!("{}: {}", path.display(), e)))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let dataset = match serde_json::from_str::<DatasetFile>(raw)? {
            DatasetFile::Wrapped(dataset) => dataset,
            DatasetFile::Bare(examples) => GoldenDataset { examples },
        };
        if dataset.examples.is_empty() {
            return Err(Error::Validation(
                "golden dataset must contain at least one example".to_string(),
            ));
        }
        Ok(dataset)
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn task_types(&self) -> HashSet<TaskType> {
        self.examples.iter().map(|e| e.task_type).collect()
    }
}

impl Default for GoldenDataset {
    fn default() -> Self {
        Self::new(vec![
            GoldenExample::new(
                "code-quicksort",
                TaskType::CodeGeneration,
                "Implement quicksort in Rust using a recursive partition function",
                &["quicksort", "partition", "recursive"],
                "A recursive quicksort picks a pivot, partitions the slice around it and sorts both halves",
            ),
            GoldenExample::new(
                "analysis-latency",
                TaskType::Analysis,
                "Analyze why request latency doubled after the cache migration",
                &["latency", "cache", "migration"],
                "Latency doubled because the cache migration dropped warm entries and increased misses",
            ),
            GoldenExample::new(
                "creative-haiku",
                TaskType::Creative,
                "Write a short poem about autumn rain on city streets",
                &["autumn", "rain", "streets"],
                "Autumn rain taps the city streets in a quiet rhythm",
            ),
            GoldenExample::new(
                "research-consensus",
                TaskType::Research,
                "Research and compare consensus algorithms such as Raft and Paxos",
                &["raft", "paxos", "consensus"],
                "Raft and Paxos are consensus algorithms; Raft favors understandability through leader election",
            ),
            GoldenExample::new(
                "planning-rollout",
                TaskType::Planning,
                "Plan a phased rollout of the new billing service with milestones",
                &["rollout", "billing", "milestones"],
                "A phased rollout of the billing service moves through staged milestones with rollback checkpoints",
            ),
            GoldenExample::new(
                "general-timezone",
                TaskType::General,
                "Explain what a timezone offset means",
                &["timezone", "offset"],
                "A timezone offset is the difference between local time and UTC",
            ),
        ])
    }
}

/// Lowercased alphanumeric tokens longer than two characters
pub fn token_set(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 2)
        .map(|t| t.to_lowercase())
        .collect()
}

pub fn jaccard_similarity(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_dataset_spans_all_task_types() {
        let dataset = GoldenDataset::default();
        assert_eq!(dataset.task_types().len(), TaskType::ALL.len());
    }

    #[test]
    fn test_score_rewards_keyword_coverage() {
        let example = &GoldenDataset::default().examples[0];
        let good = example.score("quicksort uses a recursive partition around a pivot");
        let partial = example.score("quicksort is fast");
        let bad = example.score("bananas are yellow");
        assert!(good > partial, "{} vs {}", good, partial);
        assert!(partial > bad, "{} vs {}", partial, bad);
        assert!(bad < 0.05);
        assert!((0.0..=1.0).contains(&good));
    }

    #[test]
    fn test_score_without_keywords_is_jaccard() {
        let example = GoldenExample::new("x", TaskType::General, "q", &[], "alpha beta gamma");
        assert!((example.score("alpha beta gamma") - 1.0).abs() < 1e-9);
        assert_eq!(example.score(""), 0.0);
    }

    #[test]
    fn test_jaccard() {
        let a = token_set("red green blue");
        let b = token_set("green blue yellow");
        assert!((jaccard_similarity(&a, &b) - 0.5).abs() < 1e-9);
        assert_eq!(jaccard_similarity(&a, &HashSet::new()), 0.0);
    }

    #[test]
    fn test_load_wrapped_and_bare() {
        let dir = tempfile::tempdir().unwrap();

        let wrapped = dir.path().join("wrapped.json");
        std::fs::write(
            &wrapped,
            r#"{"examples":[{"id":"a","task_type":"analysis","input":"why","expected_keywords":["why"]}]}"#,
        )
        .unwrap();
        let dataset = GoldenDataset::load(&wrapped).unwrap();
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.examples[0].task_type, TaskType::Analysis);
        assert!(dataset.examples[0].reference.is_empty());

        let bare = dir.path().join("bare.json");
        std::fs::write(
            &bare,
            r#"[{"id":"b","task_type":"creative","input":"poem","reference":"a poem"}]"#,
        )
        .unwrap();
        assert_eq!(GoldenDataset::load(&bare).unwrap().examples[0].id, "b");
    }

    #[test]
    fn test_load_rejects_empty_and_missing() {
        assert!(GoldenDataset::from_json(r#"{"examples":[]}"#).is_err());
        assert!(GoldenDataset::load("/definitely/not/here.json").is_err());
    }
}
