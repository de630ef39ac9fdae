//! Task classification
//!
//! Maps raw task text onto a closed set of task types and a complexity
//! score in [0, 1]. Type is decided by keyword voting with a fixed priority
//! tie-break; complexity blends length, technical vocabulary and compound
//! requirement markers, each saturating at a configured point.

mod classifier;
mod text;
mod types;

pub use classifier::{ClassifierConfig, ComplexityClassifier, TypeKeywords};
pub use text::TextFeatures;
pub use types::{Classification, ComplexitySignals, Task, TaskType};
