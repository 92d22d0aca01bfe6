//! Error types shared across the research core.

use crate::state::SchemaError;
use crate::tools::retry::Retryable;
use thiserror::Error;

/// Failure of a structured generation call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("generation timed out after {0}s")]
    Timeout(u64),
    #[error("transient generation failure: {0}")]
    Transient(String),
    /// The output parsed but broke a constraint the caller depends on
    #[error("generated output failed validation: {0}")]
    Validation(String),
    #[error("generation provider error: {0}")]
    Provider(String),
}

impl Retryable for GenerationError {
    fn is_retryable(&self) -> bool {
        // A fresh sample may well produce a valid output.
        matches!(
            self,
            Self::Timeout(_) | Self::Transient(_) | Self::Validation(_)
        )
    }

    fn timed_out(after_secs: u64) -> Self {
        Self::Timeout(after_secs)
    }
}

/// Failure of a retrieval call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RetrievalError {
    #[error("retrieval timed out after {0}s")]
    Timeout(u64),
    #[error("transient retrieval failure: {0}")]
    Transient(String),
    /// The backend refused the query; retrying will not help
    #[error("retrieval rejected: {0}")]
    Rejected(String),
}

impl Retryable for RetrievalError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transient(_))
    }

    fn timed_out(after_secs: u64) -> Self {
        Self::Timeout(after_secs)
    }
}

/// Errors surfaced by the research service
#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("persistence unavailable: {0}")]
    Persistence(String),
    #[error("unknown research session `{0}`")]
    UnknownSession(String),
    #[error("session `{0}` is already running")]
    AlreadyRunning(String),
    #[error("session `{0}` is already complete")]
    AlreadyComplete(String),
    #[error("invalid research request: {0}")]
    InvalidRequest(String),
    /// The run's task ended without reporting an outcome
    #[error("session `{0}` ended without an outcome")]
    Aborted(String),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl ResearchError {
    pub(crate) fn persistence(err: anyhow::Error) -> Self {
        Self::Persistence(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(GenerationError::Timeout(5).is_retryable());
        assert!(GenerationError::Validation("bad".into()).is_retryable());
        assert!(!GenerationError::Provider("no key".into()).is_retryable());
        assert!(RetrievalError::Transient("503".into()).is_retryable());
        assert!(!RetrievalError::Rejected("blocked".into()).is_retryable());
    }
}
