//! Risk error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RiskError {
    #[error("Invalid time window '{0}': expected HH:MM-HH:MM")]
    InvalidWindow(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type RiskResult<T> = Result<T, RiskError>;
