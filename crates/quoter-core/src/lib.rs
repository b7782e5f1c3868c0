//! Core domain types for the quoter execution core.
//!
//! This crate provides the vocabulary shared by every other crate:
//! - `Price`, `Size`: precision-safe numeric types with tick/lot rounding
//! - `OrderSide`, `OrderType`, `TimeInForce`, `ClientOrderId`: order enums and keys
//! - `IdAllocator`: collision-resistant client order id generation
//! - `Order`, `OrderStatus`: the locally tracked order and its state machine
//! - `InstrumentSpec`, `MarketSnapshot`, `PortfolioTarget`: external inputs

pub mod clock;
pub mod decimal;
pub mod error;
pub mod execution;
pub mod ids;
pub mod market;
pub mod order;
pub mod portfolio;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use execution::{Cohort, ExecutionEvent, Order, OrderStatus, OrderUpdateEvent};
pub use ids::IdAllocator;
pub use market::{InstrumentRegistry, InstrumentSpec, MarketSnapshot};
pub use order::{ClientOrderId, OrderRequest, OrderSide, OrderType, TimeInForce};
pub use portfolio::{PortfolioTarget, PortfolioTargets};
