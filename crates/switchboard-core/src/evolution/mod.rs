//! Evolutionary prompt optimization
//!
//! Prompt templates are genomes. A population is scored against a golden
//! dataset on quality, speed and cost, then bred with tournament selection,
//! fragment-wise crossover and phrase-library mutation. The fittest genomes
//! are handed to the online bandit for live serving.

pub mod evaluator;
pub mod genome;
pub mod golden;
pub mod operators;
pub mod optimizer;

pub use evaluator::FitnessEvaluator;
pub use genome::{
    FewShotExample, FitnessVector, FitnessWeights, FragmentKind, Genome, PromptTemplate,
    default_seed_templates,
};
pub use golden::{GoldenDataset, GoldenExample};
pub use operators::{MutationLibrary, crossover, mutate, tournament_select};
pub use optimizer::{EvolutionConfig, EvolutionSummary, EvolutionaryOptimizer, GenerationReport};
