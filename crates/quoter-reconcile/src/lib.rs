//! Reconciliation of the local order table against the venue.
//!
//! [`ReconciliationEngine`] runs on its own timer, independent of the tick
//! cadence. It repairs drift in the table the lifecycle manager owns and
//! drives the shared [`quoter_risk::QuotingPause`] latch on hard desync or
//! repeated fetch failures.

pub mod config;
pub mod engine;
pub mod error;

pub use config::ReconcileConfig;
pub use engine::{ReconcileAction, ReconciliationEngine, ReconciliationResult};
pub use error::{ReconcileError, ReconcileResult};
