//! Reconciliation error types.

use quoter_gateway::GatewayError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Failed to fetch {what}: {source}")]
    Fetch {
        what: &'static str,
        #[source]
        source: GatewayError,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
