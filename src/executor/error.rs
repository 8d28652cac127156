//! Executor error type

use crate::error::{Error, ErrorCategory, PolycastErrorTrait};

/// Failures surfaced by [`super::Executor::execute_with_retry`]
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Breaker for the key is open; the operation was not attempted
    #[error("circuit open for {key}, retry in {retry_after_ms}ms")]
    CircuitOpen { key: String, retry_after_ms: u64 },

    /// Every attempt failed
    #[error("operation {operation_id} failed after {attempts} attempts: {source}")]
    FinalFailure {
        operation_id: String,
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    /// Authorization or other permanent failure; not retried
    #[error("operation {operation_id} failed permanently: {source}")]
    Permanent {
        operation_id: String,
        #[source]
        source: Box<Error>,
    },

    /// A non-retryable failure handled by the caller (e.g. unparsable output)
    #[error("operation {operation_id} not retried ({category}): {source}")]
    NotRetried {
        operation_id: String,
        category: ErrorCategory,
        #[source]
        source: Box<Error>,
    },
}

impl ExecutorError {
    /// The error returned by the last attempt, if any attempt ran
    pub fn last_error(&self) -> Option<&Error> {
        match self {
            Self::CircuitOpen { .. } => None,
            Self::FinalFailure { source, .. }
            | Self::Permanent { source, .. }
            | Self::NotRetried { source, .. } => Some(source),
        }
    }
}

impl PolycastErrorTrait for ExecutorError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::CircuitOpen { .. } => ErrorCategory::Transient,
            Self::Permanent { .. } => ErrorCategory::Permanent,
            Self::FinalFailure { source, .. } | Self::NotRetried { source, .. } => {
                source.category()
            }
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::CircuitOpen { .. } => "circuit_open",
            Self::FinalFailure { source, .. }
            | Self::Permanent { source, .. }
            | Self::NotRetried { source, .. } => source.code(),
        }
    }
}
