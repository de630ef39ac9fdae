//! Parallel reasoning - best-of-N fan-out for complex tasks
//!
//! Runs N diverging attempts against the chosen agent, joins them until
//! all finish or the coordinator timeout elapses, and keeps the path with
//! the highest confidence. Failed paths are dropped; if none survive a
//! single standard call is made instead.

mod coordinator;
mod types;

pub use coordinator::{ParallelReasoningCoordinator, heuristic_confidence};
pub use types::{PathFailure, PathVariant, ReasoningConfig, ReasoningOutcome, ReasoningPath};
