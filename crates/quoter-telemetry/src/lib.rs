//! Prometheus metrics and structured logging for the quoter.
//!
//! - Structured logging with tracing (JSON in production, pretty otherwise)
//! - Write-only Prometheus counters and gauges for the order lifecycle,
//!   reconciliation, command coalescing and tick latency

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
