//! Error types for Switchboard

use thiserror::Error;

/// Result type alias using Switchboard's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Switchboard error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Input errors (E001-E099)
    #[error("Invalid input: {0}")]
    Validation(String),

    // Backend errors (E100-E199)
    #[error("Backend call timed out: {0}")]
    BackendTimeout(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Rate limited. Waiting {0} seconds before retry.")]
    RateLimited(u64),

    #[error("Network error: {0}. Check your internet connection.")]
    NetworkError(#[from] reqwest::Error),

    #[error("LLM API error: {0}. Check your API key with `switchboard config get llm.api_key`.")]
    LLMError(String),

    // Request lifecycle errors (E200-E299)
    #[error("Request deadline of {0} ms exceeded")]
    DeadlineExceeded(u64),

    #[error("Operation cancelled")]
    Cancelled,

    // Selection errors (E300-E399)
    #[error("No suitable agent found for task type '{0}'")]
    NoSuitableAgent(String),

    #[error("All reasoning paths failed: {0}")]
    ReasoningFailed(String),

    // Bandit / optimizer errors (E400-E499)
    #[error("No live prompt arms. Run `switchboard evolve` to promote genomes.")]
    NoLiveArms,

    #[error("Genome '{0}' not found")]
    GenomeNotFound(String),

    #[error("Evolution failed: {0}")]
    EvolutionFailed(String),

    // Retrieval errors (E500-E599)
    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    // Storage errors (E600-E699)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Config errors (E700-E799)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "E001",
            Self::BackendTimeout(_) => "E100",
            Self::BackendUnavailable(_) => "E101",
            Self::RateLimited(_) => "E102",
            Self::NetworkError(_) => "E103",
            Self::LLMError(_) => "E104",
            Self::DeadlineExceeded(_) => "E200",
            Self::Cancelled => "E201",
            Self::NoSuitableAgent(_) => "E300",
            Self::ReasoningFailed(_) => "E301",
            Self::NoLiveArms => "E400",
            Self::GenomeNotFound(_) => "E401",
            Self::EvolutionFailed(_) => "E402",
            Self::EmbeddingFailed(_) => "E501",
            Self::DatabaseError(_) => "E600",
            Self::Serialization(_) => "E601",
            Self::ConfigError(_) => "E700",
            Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::NetworkError(_) => Some("Check internet connection".to_string()),
            Self::LLMError(_) => Some("switchboard config get llm.api_key".to_string()),
            Self::NoLiveArms => Some("switchboard evolve --offline".to_string()),
            Self::ConfigError(_) => Some("switchboard config list".to_string()),
            Self::DeadlineExceeded(_) => {
                Some("switchboard config set resilience.request_deadline_ms <ms>".to_string())
            }
            _ => None,
        }
    }

    /// Whether the error is transient and worth a single bounded retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BackendTimeout(_)
                | Self::BackendUnavailable(_)
                | Self::RateLimited(_)
                | Self::NetworkError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(Error::Validation("x".into()).code(), "E001");
        assert_eq!(Error::BackendTimeout("x".into()).code(), "E100");
        assert_eq!(Error::NoLiveArms.code(), "E400");
        assert_eq!(Error::EmbeddingFailed("x".into()).code(), "E501");
        assert_eq!(Error::Io(std::io::Error::other("x")).code(), "E9999");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::BackendTimeout("vector".into()).is_retryable());
        assert!(Error::BackendUnavailable("keyword".into()).is_retryable());
        assert!(Error::RateLimited(2).is_retryable());
        assert!(!Error::Validation("empty".into()).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn test_suggestions() {
        assert!(Error::NoLiveArms.suggestion().is_some());
        assert!(Error::Validation("empty".into()).suggestion().is_none());
    }
}
