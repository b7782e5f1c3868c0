//! Executor error types.
//!
//! Admission failures are raised before any network call and are always
//! safe to retry on the next tick. Gateway failures carry the venue's
//! classification through unchanged.

use rust_decimal::Decimal;
use thiserror::Error;

use quoter_core::ClientOrderId;
use quoter_gateway::GatewayError;
use quoter_risk::ActionKind;

/// Which admission gate refused an order.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdmissionError {
    #[error("Throttled: {kind} rate exceeded")]
    Throttled { kind: ActionKind },

    #[error("Trading paused: {reason}")]
    Paused { reason: String },

    #[error("Trading window closed")]
    SchedulerClosed,

    #[error("Trading window in cooldown")]
    SchedulerCooldown,

    #[error("Level cap reached: {active} active, cap {cap}")]
    LevelCapReached { active: usize, cap: usize },

    #[error("Budget exhausted: {active_usd} active of {target_usd} USD")]
    BudgetExhausted {
        active_usd: Decimal,
        target_usd: Decimal,
    },

    #[error("Quantity non-positive after budget shrink")]
    NonPositiveQty,

    #[error("Circuit breaker open")]
    CircuitOpen,
}

impl AdmissionError {
    /// Metric label of the gate.
    pub fn gate(&self) -> &'static str {
        match self {
            Self::Throttled { .. } => "throttle",
            Self::Paused { .. } => "pause",
            Self::SchedulerClosed => "scheduler_closed",
            Self::SchedulerCooldown => "scheduler_cooldown",
            Self::LevelCapReached { .. } => "level_cap",
            Self::BudgetExhausted { .. } => "budget",
            Self::NonPositiveQty => "non_positive_qty",
            Self::CircuitOpen => "circuit",
        }
    }
}

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Admission blocked: {0}")]
    Admission(#[from] AdmissionError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Order not found: {0}")]
    NotFound(ClientOrderId),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Client order id already active: {0}")]
    DuplicateClientId(ClientOrderId),

    #[error("Snapshot I/O failed: {0}")]
    Snapshot(#[from] std::io::Error),

    #[error("Snapshot encoding failed: {0}")]
    SnapshotFormat(#[from] serde_json::Error),
}

impl OrderError {
    pub fn is_admission(&self) -> bool {
        matches!(self, Self::Admission(_))
    }

    /// Admission failures and transient venue errors may succeed later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Admission(_) => true,
            Self::Gateway(err) => err.is_transient(),
            _ => false,
        }
    }

    pub fn admission(&self) -> Option<&AdmissionError> {
        match self {
            Self::Admission(err) => Some(err),
            _ => None,
        }
    }
}

pub type OrderResult<T> = Result<T, OrderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let admission: OrderError = AdmissionError::SchedulerClosed.into();
        assert!(admission.is_admission());
        assert!(admission.is_retryable());

        let transient: OrderError = GatewayError::timeout("slow").into();
        assert!(!transient.is_admission());
        assert!(transient.is_retryable());

        let fatal: OrderError = GatewayError::invalid_params("bad qty").into();
        assert!(!fatal.is_retryable());

        assert!(!OrderError::NotFound(ClientOrderId::from("x")).is_retryable());
    }

    #[test]
    fn test_gate_labels() {
        assert_eq!(
            AdmissionError::Throttled {
                kind: ActionKind::Create
            }
            .gate(),
            "throttle"
        );
        assert_eq!(AdmissionError::CircuitOpen.gate(), "circuit");
    }
}
