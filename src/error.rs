use thiserror::Error;

use crate::services::llm_provider::LlmError;
use crate::services::store::StoreError;

/// Engine error taxonomy. Every variant carries a machine-readable code so
/// hosts can branch without string matching.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad input; surfaced to the caller, never retried.
    #[error("{message}")]
    Validation {
        code: &'static str,
        message: String,
    },

    /// A text-generation or placement collaborator failed. `retryable` tells
    /// whether the failure class is worth another bounded attempt.
    #[error("collaborator failure ({code})")]
    Collaborator {
        code: &'static str,
        retryable: bool,
        #[source]
        source: LlmError,
    },

    /// The content/mastery store failed; aborts the dependent flow.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Operation invoked in a state that does not permit it.
    #[error("{message}")]
    State {
        code: &'static str,
        message: String,
    },
}

impl EngineError {
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            code,
            message: message.into(),
        }
    }

    pub fn state(code: &'static str, message: impl Into<String>) -> Self {
        Self::State {
            code,
            message: message.into(),
        }
    }

    pub fn collaborator(source: LlmError) -> Self {
        let (code, retryable) = match &source {
            LlmError::RateLimited { .. } => ("COLLABORATOR_RATE_LIMITED", true),
            LlmError::Timeout => ("COLLABORATOR_TIMEOUT", true),
            LlmError::ServerError { .. } => ("COLLABORATOR_SERVER_ERROR", true),
            LlmError::RetryExhausted { .. } => ("RETRY_EXHAUSTED", false),
            _ => ("COLLABORATOR_FAILED", false),
        };
        Self::Collaborator {
            code,
            retryable,
            source,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { code, .. } => code,
            Self::Collaborator { code, .. } => code,
            Self::Store(err) => err.code(),
            Self::State { code, .. } => code,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Collaborator { retryable: true, .. })
    }
}
