//! Online serving of prompt genomes
//!
//! Every live genome is an arm with a Beta posterior over "this response was
//! good enough". Requests are routed by Thompson sampling, outcomes are
//! binarized against a reward threshold, and underperforming arms are retired.
//! New arms can ramp up their traffic share gradually, with the rest served by
//! the current default genome.
//!
//! # Example
//!
//! ```rust,ignore
//! use switchboard_core::routing::{BanditConfig, OnlineBanditPolicy, Outcome};
//!
//! let policy = OnlineBanditPolicy::new(BanditConfig::default());
//! policy.promote("genome-a").await?;
//!
//! let choice = policy.select().await?;
//! // ... serve the request with choice.genome_id ...
//! policy.record_outcome(&Outcome {
//!     genome_id: choice.genome_id,
//!     quality: 0.9,
//!     latency_ms: 420,
//!     cost_usd: 0.002,
//!     fallback_used: false,
//! }).await?;
//! ```

pub mod bandit;
pub mod policy;
pub mod store;
pub mod types;

pub use bandit::{ArmPosterior, ThompsonSampler};
pub use policy::OnlineBanditPolicy;
pub use store::{CREATE_POLICY_TABLES_SQL, PolicyStore, PolicyStoreSummary};
pub use types::{
    ArmSelection, ArmStats, BanditArm, BanditConfig, Outcome, RewardConfig, RewardUpdate,
    SelectionReason,
};
