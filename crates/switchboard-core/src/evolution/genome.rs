//! Prompt-template genomes and their fitness

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One few-shot demonstration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FewShotExample {
    pub input: String,
    pub output: String,
}

impl FewShotExample {
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }
}

/// Independently recombinable blocks of a prompt template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentKind {
    Instruction,
    ReasoningScaffold,
    OutputFormat,
    Examples,
}

impl FragmentKind {
    pub const ALL: [FragmentKind; 4] = [
        FragmentKind::Instruction,
        FragmentKind::ReasoningScaffold,
        FragmentKind::OutputFormat,
        FragmentKind::Examples,
    ];
}

/// Parameterized prompt text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub instruction: String,
    pub reasoning_scaffold: String,
    pub output_format: String,
    #[serde(default)]
    pub examples: Vec<FewShotExample>,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            instruction: "Solve the task completely and accurately.".to_string(),
            reasoning_scaffold: "Think through the problem step by step before answering."
                .to_string(),
            output_format: "Answer in concise prose.".to_string(),
            examples: Vec::new(),
        }
    }
}

impl PromptTemplate {
    pub fn new(
        instruction: impl Into<String>,
        reasoning_scaffold: impl Into<String>,
        output_format: impl Into<String>,
    ) -> Self {
        Self {
            instruction: instruction.into(),
            reasoning_scaffold: reasoning_scaffold.into(),
            output_format: output_format.into(),
            examples: Vec::new(),
        }
    }

    pub fn with_example(mut self, example: FewShotExample) -> Self {
        self.examples.push(example);
        self
    }

    /// Fill the template with a task and retrieved context passages
    pub fn render(&self, task: &str, context: &[String]) -> String {
        let mut prompt = String::new();

        for block in [&self.instruction, &self.reasoning_scaffold] {
            if !block.trim().is_empty() {
                prompt.push_str(block.trim());
                prompt.push_str("\n\n");
            }
        }

        if !self.examples.is_empty() {
            prompt.push_str("Examples:\n");
            for example in &self.examples {
                prompt.push_str(&format!(
                    "Input: {}\nOutput: {}\n",
                    example.input, example.output
                ));
            }
            prompt.push('\n');
        }

        if !context.is_empty() {
            prompt.push_str("Context:\n");
            for passage in context {
                prompt.push_str("- ");
                prompt.push_str(passage.trim());
                prompt.push('\n');
            }
            prompt.push('\n');
        }

        prompt.push_str("Task: ");
        prompt.push_str(task.trim());

        if !self.output_format.trim().is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(self.output_format.trim());
        }

        prompt
    }
}

/// Unscalarized fitness, each component in [0, 1] with higher better
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitnessVector {
    pub quality: f64,
    /// Inverse latency
    pub speed: f64,
    /// Inverse token/compute cost
    pub cost: f64,
}

impl FitnessVector {
    pub const WORST: FitnessVector = FitnessVector {
        quality: 0.0,
        speed: 0.0,
        cost: 0.0,
    };

    /// Component-wise mean
    pub fn mean(vectors: &[FitnessVector]) -> FitnessVector {
        if vectors.is_empty() {
            return Self::WORST;
        }
        let n = vectors.len() as f64;
        FitnessVector {
            quality: vectors.iter().map(|v| v.quality).sum::<f64>() / n,
            speed: vectors.iter().map(|v| v.speed).sum::<f64>() / n,
            cost: vectors.iter().map(|v| v.cost).sum::<f64>() / n,
        }
    }
}

/// Scalarization weights
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitnessWeights {
    pub quality: f64,
    pub speed: f64,
    pub cost: f64,
}

impl Default for FitnessWeights {
    fn default() -> Self {
        Self {
            quality: 0.6,
            speed: 0.2,
            cost: 0.2,
        }
    }
}

impl FitnessWeights {
    /// Weighted mean of the components, in [0, 1]
    pub fn scalarize(&self, v: &FitnessVector) -> f64 {
        let total = self.quality + self.speed + self.cost;
        if total <= 0.0 || !total.is_finite() {
            return v.quality.clamp(0.0, 1.0);
        }
        ((v.quality * self.quality + v.speed * self.speed + v.cost * self.cost) / total)
            .clamp(0.0, 1.0)
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, w) in [("quality", self.quality), ("speed", self.speed), ("cost", self.cost)] {
            if !w.is_finite() || w < 0.0 {
                return Err(format!("evolution.weights.{} must be non-negative", name));
            }
        }
        if self.quality + self.speed + self.cost <= 0.0 {
            return Err("evolution.weights must not all be zero".to_string());
        }
        Ok(())
    }
}

/// A candidate prompt template with its fitness record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Genome {
    pub genome_id: String,
    pub generation: u32,
    pub template: PromptTemplate,
    pub parent_ids: Vec<String>,
    pub fitness: Option<FitnessVector>,
    pub scalar_fitness: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Genome {
    /// Generation-zero genome
    pub fn seed(template: PromptTemplate) -> Self {
        Self::child(template, 0, Vec::new())
    }

    pub fn child(template: PromptTemplate, generation: u32, parent_ids: Vec<String>) -> Self {
        Self {
            genome_id: Uuid::new_v4().to_string(),
            generation,
            template,
            parent_ids,
            fitness: None,
            scalar_fitness: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_scored(&self) -> bool {
        self.scalar_fitness.is_some()
    }

    /// Attach a complete fitness record
    pub fn set_fitness(&mut self, fitness: FitnessVector, weights: &FitnessWeights) {
        self.scalar_fitness = Some(weights.scalarize(&fitness));
        self.fitness = Some(fitness);
    }

    /// Scalar fitness, with unscored genomes ranked below everything
    pub fn rank_key(&self) -> f64 {
        self.scalar_fitness.unwrap_or(f64::NEG_INFINITY)
    }

    /// First eight characters of the id, for logs and tables
    pub fn short_id(&self) -> &str {
        let end = self
            .genome_id
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.genome_id.len());
        &self.genome_id[..end]
    }
}

/// Seed templates used when none are configured
pub fn default_seed_templates() -> Vec<PromptTemplate> {
    vec![
        PromptTemplate::default(),
        PromptTemplate::new(
            "You are an expert assistant. Address every requirement in the task.",
            "List the key requirements first, then address each one.",
            "Use a short bulleted answer.",
        ),
        PromptTemplate::new(
            "Answer the task directly.",
            "",
            "Respond in one paragraph.",
        )
        .with_example(FewShotExample::new(
            "Summarize the benefits of caching",
            "Caching lowers latency and reduces load on backing stores.",
        )),
    ]
}
