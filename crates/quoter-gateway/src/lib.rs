//! Remote order gateway for the quoter.
//!
//! The execution core talks to the venue only through [`OrderGateway`].
//! This crate owns that contract plus the pieces that sit around it:
//!
//! - [`GatewayError`]: error code, transient/fatal classification, retry hint
//! - [`RetryingGateway`]: exponential backoff with jitter for transient errors
//! - [`PaperGateway`]: in-memory venue used for paper trading and tests
//! - [`ChaosGateway`]: latency/reject injection wrapper for fault drills

pub mod chaos;
pub mod error;
pub mod gateway;
pub mod paper;
pub mod retry;
pub mod types;

pub use chaos::{ChaosConfig, ChaosGateway};
pub use error::{GatewayError, GatewayErrorCode, GatewayResult};
pub use gateway::{BoxFuture, DynGateway, OrderGateway};
pub use paper::{GatewayCall, PaperGateway};
pub use retry::{BackoffPolicy, RetryingGateway};
pub use types::{AmendRequest, BatchOutcome, CancelTarget, OrderSnapshot, PlaceAck, PlaceRequest};
