//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] quoter_telemetry::TelemetryError),

    #[error("Risk error: {0}")]
    Risk(#[from] quoter_risk::RiskError),

    #[error("Order error: {0}")]
    Order(#[from] quoter_executor::OrderError),

    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] quoter_reconcile::ReconcileError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
