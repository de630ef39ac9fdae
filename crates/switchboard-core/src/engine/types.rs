use serde::{Deserialize, Serialize};

use crate::agents::{ReasoningMode, ScoreReason};
use crate::classify::TaskType;
use crate::evolution::EvolutionSummary;
use crate::routing::{ArmStats, RewardUpdate, SelectionReason};

/// How a response was produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub task_type: TaskType,
    pub complexity_score: f64,
    /// Agent that produced the final text
    pub agent_id: String,
    pub selection_score: f64,
    pub selection_reasons: Vec<ScoreReason>,
    pub mode: ReasoningMode,
    pub genome_id: String,
    pub genome_reason: SelectionReason,
    pub context_doc_ids: Vec<String>,
    pub retrieval_cache_hit: bool,
    pub paths_attempted: usize,
    pub paths_succeeded: usize,
    pub latency_ms: u64,
    pub token_count: u32,
    pub cost_usd: f64,
    /// Self-reported or heuristic confidence used as the quality signal
    pub quality: f64,
    /// Present when the outcome was fed back into the bandit
    pub reward: Option<RewardUpdate>,
    /// The request deadline fired and a partial result was returned
    pub deadline_hit: bool,
    /// Any stage degraded (retrieval, agent, genome, reasoning)
    pub fallback_used: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResponse {
    pub task_id: String,
    pub text: String,
    pub metadata: ResponseMetadata,
}

/// Read-only projection of engine state for reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Total generations evolved
    pub generation: u32,
    pub best_fitness: Option<f64>,
    pub mean_fitness: Option<f64>,
    pub default_genome: Option<String>,
    pub arms: Vec<ArmStats>,
    pub requests_served: u64,
    pub fallback_responses: u64,
}

/// Evolution run plus the genomes handed to the bandit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionOutcome {
    pub summary: EvolutionSummary,
    /// Newly promoted genome ids, best first
    pub promoted: Vec<String>,
}
