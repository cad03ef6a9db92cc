use std::time::Duration;

use thiserror::Error;

/// Engine-wide error taxonomy.
///
/// `InvalidArgument` and `Validation` are caller contract violations: fatal to
/// the call that raised them, surfaced immediately, never retried.
/// `StoreUnavailable`, `Timeout` and `Upstream` are transient infrastructure
/// failures; the upstream client retries them internally under a bounded
/// policy, everything else surfaces them for the caller's own retry decision.
/// `RateLimited` is absorbed by the client's backoff loop and only escalates
/// to `Upstream` once the retry bound is exhausted.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("sales facts store unavailable: {0}")]
    StoreUnavailable(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("rate limited by upstream")]
    RateLimited { retry_after: Option<Duration> },

    #[error("upstream timeout: {0}")]
    Timeout(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Whether the failure is transient and worth retrying by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_)
                | Self::Timeout(_)
                | Self::Upstream(_)
                | Self::RateLimited { .. }
        )
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(EngineError::Upstream("boom".into()).is_retryable());
        assert!(EngineError::Timeout("30s elapsed".into()).is_retryable());
        assert!(EngineError::RateLimited { retry_after: None }.is_retryable());
        assert!(!EngineError::InvalidArgument("horizon".into()).is_retryable());
        assert!(!EngineError::Validation("negative units".into()).is_retryable());
    }
}
