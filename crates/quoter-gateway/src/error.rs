//! Gateway error classification.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// What went wrong on the venue side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayErrorCode {
    Timeout,
    Connection,
    RateLimited,
    ServerError,
    InvalidParams,
    UnknownInstrument,
    Rejected,
    NotFound,
}

impl GatewayErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connection => "connection",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::InvalidParams => "invalid_params",
            Self::UnknownInstrument => "unknown_instrument",
            Self::Rejected => "rejected",
            Self::NotFound => "not_found",
        }
    }

    /// Transient codes are retried with backoff; the rest surface at once.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Connection | Self::RateLimited | Self::ServerError
        )
    }
}

impl fmt::Display for GatewayErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error reported by a gateway call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct GatewayError {
    pub code: GatewayErrorCode,
    pub message: String,
    /// Venue-suggested wait before retrying.
    pub retry_after: Option<Duration>,
}

impl GatewayError {
    pub fn new(code: GatewayErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCode::Timeout, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCode::Connection, message)
    }

    pub fn rate_limited(retry_after: Duration) -> Self {
        Self::new(GatewayErrorCode::RateLimited, "rate limited").with_retry_after(retry_after)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCode::ServerError, message)
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCode::InvalidParams, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCode::Rejected, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCode::NotFound, message)
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.code.is_transient()
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(GatewayError::timeout("t").is_transient());
        assert!(GatewayError::connection("c").is_transient());
        assert!(GatewayError::rate_limited(Duration::from_millis(100)).is_transient());
        assert!(GatewayError::server_error("503").is_transient());
        assert!(!GatewayError::invalid_params("qty").is_transient());
        assert!(!GatewayError::rejected("post-only").is_transient());
        assert!(!GatewayError::not_found("gone").is_transient());
    }

    #[test]
    fn test_display() {
        let err = GatewayError::rejected("would cross");
        assert_eq!(err.to_string(), "rejected: would cross");
        assert_eq!(
            GatewayError::rate_limited(Duration::from_millis(250)).retry_after,
            Some(Duration::from_millis(250))
        );
    }
}
