//! Outbound alert channels
//!
//! A channel only knows how to hand one alert to its destination. Retries,
//! circuit breaking and queueing happen in the delivery worker, which calls
//! [`Channel::send`] through the executor under the `alerts:<channel>` key.

pub mod webhook;

use async_trait::async_trait;

use crate::error::{ErrorCategory, PolycastErrorTrait};
use crate::notifications::PerformanceAlert;

/// Result type for channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Channel failures, classified for the executor
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Transport failure (connect, timeout, TLS)
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Channel built from an unusable configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Destination answered 5xx
    #[error("Channel temporarily unavailable: {0}")]
    Unavailable(String),

    /// Destination answered 429
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Destination refused the alert (4xx other than 429)
    #[error("Alert rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl PolycastErrorTrait for ChannelError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::HttpError(_) | Self::Unavailable(_) | Self::RateLimited(_) => {
                ErrorCategory::Transient
            }
            Self::InvalidConfig(_) => ErrorCategory::Config,
            Self::Rejected { .. } => ErrorCategory::Permanent,
        }
    }

    /// Codes are kept apart from the AI collaborator's so a webhook outage
    /// never triggers AI recovery actions
    fn code(&self) -> &'static str {
        match self {
            Self::HttpError(e) if e.is_timeout() => "channel_timeout",
            Self::HttpError(_) | Self::Unavailable(_) => "channel_unavailable",
            Self::RateLimited(_) => "channel_rate_limited",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Rejected { .. } => "channel_rejected",
        }
    }
}

/// A destination for alerts
#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel name, used as the executor endpoint
    fn name(&self) -> &str;

    /// Hand one alert to the destination
    async fn send(&self, alert: &PerformanceAlert) -> ChannelResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_is_permanent() {
        let err = ChannelError::Rejected {
            status: 401,
            body: "bad token".into(),
        };
        assert_eq!(err.category(), ErrorCategory::Permanent);
        assert_eq!(err.code(), "channel_rejected");
        assert!(!err.is_recoverable());

        let err = ChannelError::Unavailable("HTTP 503".into());
        assert!(err.is_recoverable());
        // recovery actions only react to collaborator codes
        assert_eq!(ChannelError::RateLimited("slow down".into()).code(), "channel_rate_limited");
    }
}
