//! Agent profiles and selection
//!
//! Profiles are loaded once from configuration and shared read-only by all
//! requests. Specialization bonuses are a declarative rule table
//! (predicate → bonus) evaluated per request.

mod profile;
mod rules;
mod selector;

pub use profile::{AgentProfile, AgentProfileConfig, default_profiles};
pub use rules::{BonusRule, Predicate};
pub use selector::{AgentSelector, ReasoningMode, ScoreReason, SelectionResult, SelectorConfig};
