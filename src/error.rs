//! Unified error handling for the polycast crate
//!
//! Every domain error (store, AI collaborator, executor, scheduler, alert
//! channels) folds into the single [`Error`] enum so that fallible operations
//! can cross module boundaries, in particular through the retry executor.
//!
//! # Architecture
//!
//! - [`PolycastErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification deciding how a failure is handled
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use polycast::error::{Error, ErrorCategory, PolycastErrorTrait};
//!
//! fn handle_error(err: &Error) {
//!     match err.category() {
//!         ErrorCategory::Transient => println!("retrying: {err}"),
//!         ErrorCategory::Permanent => eprintln!("manual intervention: {err}"),
//!         _ => eprintln!("{} ({})", err, err.code()),
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::executor::ExecutorError;
pub use crate::llm::LlmError;
pub use crate::notifications::channels::ChannelError;
pub use crate::scheduler::error::SchedulerError;
pub use crate::store::StoreError;

/// Common trait for all polycast error types
pub trait PolycastErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;

    /// Stable machine-readable code used for failure pattern analysis
    fn code(&self) -> &'static str;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Timeouts, rate limits, temporary unavailability. Retried with backoff.
    Transient,
    /// Queue overload, memory pressure. Left to the resource governor.
    ResourceExhaustion,
    /// Authorization and other permanent failures. Never retried.
    Permanent,
    /// Unparsable or nonsensical collaborator output. Degrades to heuristics.
    Assessment,
    /// Configuration and validation errors
    Config,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether the executor may retry an error of this category
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient | Self::Other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::ResourceExhaustion => "resource_exhaustion",
            Self::Permanent => "permanent",
            Self::Assessment => "assessment",
            Self::Config => "config",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unified error type for the polycast crate
#[derive(Error, Debug)]
pub enum Error {
    /// Content store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// AI text-analysis collaborator errors
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Retry executor errors (circuit open, final failure)
    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    /// Scheduling errors
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Alert delivery errors
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Work refused because a queue is over its current limit
    #[error("Queue overload: {pending} pending items exceed limit {limit}")]
    QueueOverload { pending: usize, limit: usize },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl PolycastErrorTrait for Error {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Store(e) => e.category(),
            Self::Llm(e) => e.category(),
            Self::Executor(e) => e.category(),
            Self::Scheduler(e) => e.category(),
            Self::Channel(e) => e.category(),
            Self::QueueOverload { .. } => ErrorCategory::ResourceExhaustion,
            Self::Io(_) => ErrorCategory::Transient,
            Self::Json(_) => ErrorCategory::Assessment,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Store(e) => e.code(),
            Self::Llm(e) => e.code(),
            Self::Executor(e) => e.code(),
            Self::Scheduler(e) => e.code(),
            Self::Channel(e) => e.code(),
            Self::QueueOverload { .. } => "queue_overload",
            Self::Io(_) => "io",
            Self::Json(_) => "invalid_response",
            Self::Config(_) => "config",
            Self::Other { .. } => "other",
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    /// The executor failure this error carries, if an executor already
    /// logged and counted it
    pub fn executor_failure(&self) -> Option<&ExecutorError> {
        match self {
            Self::Executor(e) => Some(e),
            Self::Scheduler(SchedulerError::Store { source, .. }) => Some(source),
            _ => None,
        }
    }
}

/// Result type alias using the unified Error
pub type Result<T> = std::result::Result<T, Error>;
