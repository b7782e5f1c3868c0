//! Order execution core for the quoter.
//!
//! # Key Components
//!
//! - [`OrderLifecycleManager`]: place, amend-first update, cancel, anti-stale
//!   sweep, remote sync and push events over one active order table
//! - [`CommandBus`]: per-tick staging that coalesces commands into batches
//! - [`TickOrchestrator`]: turns snapshots into staged intents and flushes
//! - [`CohortRouter`]: deterministic control/experiment assignment
//! - [`run_periodic`]: shared runner for background loops
//!
//! # Gate Checks (in `OrderLifecycleManager::place`)
//!
//! 1. Throttle -> AdmissionError::Throttled
//! 2. Pause -> AdmissionError::Paused
//! 3. Scheduler -> AdmissionError::SchedulerClosed / SchedulerCooldown
//! 4. Portfolio -> AdmissionError::LevelCapReached / BudgetExhausted
//! 5. Circuit -> AdmissionError::CircuitOpen
//! 6. (all passed) -> gateway place

pub mod amend;
pub mod background;
pub mod command_bus;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod mid_cache;
pub mod orchestrator;
pub mod order_table;
pub mod rollout;
pub mod routing;
pub mod stale;

// Lifecycle
pub use lifecycle::{Collaborators, FlushReport, OrderLifecycleManager, PlaceParams, UpdateOutcome};

// Error types
pub use error::{AdmissionError, OrderError, OrderResult};

// Configuration
pub use config::{EffectiveOverrides, LifecycleConfig};
pub use rollout::{CohortConfigs, RolloutConfig, StrategyPatch};

// Command staging
pub use command_bus::{BatchCommand, BusConfig, Command, CommandBus, CommandKind, CommandParams};

// Tick orchestration
pub use orchestrator::{
    Intent, IntentGenerator, LatencyWindow, OrchestratorConfig, SymbolReport, TickMode,
    TickOrchestrator, TickResult, TickStats,
};

// Background loops
pub use background::{run_periodic, spawn_stale_sweep, LoopConfig, LoopStats};

// Supporting state
pub use amend::AmendPolicy;
pub use mid_cache::{MidPriceCache, MidQuote};
pub use order_table::OrderTable;
pub use routing::CohortRouter;
pub use stale::{StaleAction, StaleOutcome, StaleReason, StaleSweepSummary};
