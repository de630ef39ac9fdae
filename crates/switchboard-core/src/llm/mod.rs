//! Inference backends
//!
//! This module provides:
//! - The [`InferenceBackend`] contract consumed by the engine
//! - Timeout + single-retry wrapper for every external call
//! - An HTTP backend for OpenAI-compatible chat completion APIs (OpenRouter by default)
//! - A deterministic simulated backend for offline runs and tests

mod backend;
mod client;
mod retry;
mod simulated;
mod types;

pub use backend::{InferenceBackend, InferenceOutput, InferenceParams};
pub use client::{HttpBackend, HttpBackendBuilder, OPENROUTER_BASE_URL};
pub use retry::{RetryPolicy, call_with_retry};
pub use simulated::{Fault, SimulatedBackend};
pub use types::{ChatRequest, ChatResponse, Choice, Message, MessageRole, Usage};
