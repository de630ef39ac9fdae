//! Routing engine - the end-to-end request path
//!
//! Wires the classifier, agent selector, hybrid retriever, bandit policy
//! and reasoning coordinator into one `handle` call, and hosts offline
//! prompt evolution whose winners are promoted into the bandit.

mod pipeline;
mod types;

pub use pipeline::{RoutingEngine, RoutingEngineBuilder};
pub use types::{EngineStats, EvolutionOutcome, ResponseMetadata, TaskResponse};
