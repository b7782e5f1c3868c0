//! Paper-trading market maker.
//!
//! Main application that wires the execution core together:
//! - Paper venue and simulated market
//! - Ladder intent generation per tick
//! - Order lifecycle, reconciliation and anti-stale loops
//! - Order table persistence across restarts

pub mod app;
pub mod config;
pub mod error;
pub mod ladder;
pub mod paper_market;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
