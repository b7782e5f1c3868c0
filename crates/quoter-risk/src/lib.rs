//! Admission guards for the quoter.
//!
//! Each guard answers one question before an order reaches the venue:
//! - [`ThrottleGuard`]: is this symbol within its per-action rate?
//! - [`RuntimeGuard`]: has an operator or the reject monitor paused trading?
//! - [`QuotingPause`]: has reconciliation detected a desync?
//! - [`SchedulerSet`]: is the trading window open for this symbol?
//! - [`CircuitBreaker`]: has the venue been failing too often?

pub mod circuit;
pub mod error;
pub mod guard;
pub mod pause;
pub mod scheduler;
pub mod throttle;

pub use circuit::{CircuitBreaker, CircuitConfig, CircuitState};
pub use error::{RiskError, RiskResult};
pub use guard::{GuardConfig, RuntimeGuard};
pub use pause::{PauseReason, QuotingPause};
pub use scheduler::{SchedulerConfig, SchedulerDecision, SchedulerSet, TimeWindow, TradingScheduler};
pub use throttle::{ActionKind, ThrottleConfig, ThrottleGuard};
