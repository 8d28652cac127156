//! Error types for the scheduler module

use std::fmt;

use crate::error::{ErrorCategory, PolycastErrorTrait};
use crate::executor::ExecutorError;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Debug)]
pub enum SchedulerError {
    /// Invalid hour value (must be 0-23)
    InvalidHour { hour: u32 },

    /// Language not present in the configured table
    UnknownLanguage {
        code: String,
        valid_options: Vec<String>,
    },

    /// Scheduling rule not found
    RuleNotFound { id: String },

    /// Scheduling rule rejected
    InvalidRule { field: String, reason: String },

    /// Content store call failed while planning, after the executor gave up
    Store {
        operation: String,
        source: ExecutorError,
    },

    /// Planning pass could not complete
    PlanningFailed { reason: String },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHour { hour } => {
                write!(f, "Invalid hour '{}'. Must be 0-23", hour)
            }
            Self::UnknownLanguage {
                code,
                valid_options,
            } => {
                write!(
                    f,
                    "Unknown language '{}'. Valid options: {}",
                    code,
                    valid_options.join(", ")
                )
            }
            Self::RuleNotFound { id } => {
                write!(f, "Scheduling rule not found: {}", id)
            }
            Self::InvalidRule { field, reason } => {
                write!(f, "Invalid scheduling rule field '{}': {}", field, reason)
            }
            Self::Store { operation, source } => {
                write!(f, "Store error during '{}': {}", operation, source)
            }
            Self::PlanningFailed { reason } => {
                write!(f, "Planning failed: {}", reason)
            }
        }
    }
}

impl std::error::Error for SchedulerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl PolycastErrorTrait for SchedulerError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidHour { .. } | Self::UnknownLanguage { .. } | Self::InvalidRule { .. } => {
                ErrorCategory::Config
            }
            Self::RuleNotFound { .. } => ErrorCategory::Permanent,
            Self::Store { source, .. } => source.category(),
            Self::PlanningFailed { .. } => ErrorCategory::Other,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::InvalidHour { .. } => "invalid_hour",
            Self::UnknownLanguage { .. } => "unknown_language",
            Self::RuleNotFound { .. } => "not_found",
            Self::InvalidRule { .. } => "invalid_rule",
            Self::Store { source, .. } => source.code(),
            Self::PlanningFailed { .. } => "planning_failed",
        }
    }
}

impl SchedulerError {
    /// Create an invalid hour error
    pub fn invalid_hour(hour: u32) -> Self {
        Self::InvalidHour { hour }
    }

    /// Wrap a store call the executor already retried and logged
    pub fn store(operation: impl Into<String>, source: ExecutorError) -> Self {
        Self::Store {
            operation: operation.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::store::StoreError;

    #[test]
    fn test_error_display() {
        let err = SchedulerError::invalid_hour(25);
        assert!(err.to_string().contains("25"));

        let err = SchedulerError::UnknownLanguage {
            code: "xx".to_string(),
            valid_options: vec!["en".to_string(), "ja".to_string()],
        };
        assert!(err.to_string().contains("en, ja"));
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            SchedulerError::invalid_hour(24).category(),
            ErrorCategory::Config
        );
        assert!(!SchedulerError::RuleNotFound { id: "r".into() }.is_recoverable());
    }

    #[test]
    fn test_store_error_keeps_executor_category() {
        let circuit = SchedulerError::store(
            "list_content",
            ExecutorError::CircuitOpen {
                key: "store:list_content".into(),
                retry_after_ms: 100,
            },
        );
        assert!(circuit.is_recoverable());
        assert_eq!(circuit.code(), "circuit_open");

        let permanent = SchedulerError::store(
            "create_work_item",
            ExecutorError::Permanent {
                operation_id: "op".into(),
                source: Box::new(Error::Store(StoreError::WorkItemNotFound("w1".into()))),
            },
        );
        assert_eq!(permanent.category(), ErrorCategory::Permanent);
        assert!(!permanent.is_recoverable());

        let wrapped = Error::Scheduler(permanent);
        assert!(wrapped.executor_failure().is_some());
    }
}
