//! Switchboard Core Library
//!
//! This crate provides the core functionality for Switchboard, including:
//! - Task classification (type + complexity)
//! - Agent selection over rule-scored profiles
//! - Parallel best-of-N reasoning for complex tasks
//! - Evolutionary prompt optimization against a golden dataset
//! - Thompson-sampling bandit serving of evolved prompts (SQLite-backed)
//! - Hybrid vector + keyword retrieval with rank fusion and reranking
//! - Inference backends (OpenRouter-compatible HTTP, simulated)

pub mod classify;
pub mod agents;
pub mod llm;
pub mod reasoning;
pub mod evolution;
pub mod routing;
pub mod retrieval;
pub mod engine;
pub mod config;
pub mod error;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::engine::{RoutingEngine, TaskResponse};
    pub use crate::error::{Error, Result};
    pub use crate::evolution::GoldenDataset;
    pub use crate::llm::{InferenceBackend, SimulatedBackend};
    pub use crate::retrieval::{Document, HybridRetriever};
    pub use crate::routing::{Outcome, PolicyStore};
}
