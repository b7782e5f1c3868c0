//! The order gateway contract.
//!
//! Methods return boxed futures so the trait stays dyn-compatible and the
//! core can hold an `Arc<dyn OrderGateway>` chosen at startup.

use std::pin::Pin;
use std::sync::Arc;

use crate::error::GatewayResult;
use crate::types::{AmendRequest, BatchOutcome, CancelTarget, OrderSnapshot, PlaceAck, PlaceRequest};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Venue operations the execution core consumes.
///
/// Implementations own transport concerns: encoding, authentication and
/// per-call timeouts. Prices and sizes arrive already rounded.
pub trait OrderGateway: Send + Sync {
    fn place(&self, request: PlaceRequest) -> BoxFuture<'_, GatewayResult<PlaceAck>>;

    fn cancel(&self, target: CancelTarget) -> BoxFuture<'_, GatewayResult<()>>;

    fn amend(&self, request: AmendRequest) -> BoxFuture<'_, GatewayResult<()>>;

    /// Orders currently resting, optionally for one symbol.
    fn query_active(
        &self,
        symbol: Option<String>,
    ) -> BoxFuture<'_, GatewayResult<Vec<OrderSnapshot>>>;

    /// Most recent closed orders, newest first, at most `limit`.
    fn query_history(
        &self,
        symbol: Option<String>,
        limit: usize,
    ) -> BoxFuture<'_, GatewayResult<Vec<OrderSnapshot>>>;

    /// Place several orders for one symbol in one call.
    ///
    /// The default issues individual places in order.
    fn batch_place(
        &self,
        _symbol: String,
        requests: Vec<PlaceRequest>,
    ) -> BoxFuture<'_, BatchOutcome<PlaceAck>> {
        Box::pin(async move {
            let mut results = Vec::with_capacity(requests.len());
            for request in requests {
                results.push(self.place(request).await);
            }
            BatchOutcome::new(results)
        })
    }

    /// Cancel several orders for one symbol in one call.
    fn batch_cancel(
        &self,
        _symbol: String,
        targets: Vec<CancelTarget>,
    ) -> BoxFuture<'_, BatchOutcome<()>> {
        Box::pin(async move {
            let mut results = Vec::with_capacity(targets.len());
            for target in targets {
                results.push(self.cancel(target).await);
            }
            BatchOutcome::new(results)
        })
    }

    /// Whether the transport is connected and accepting requests.
    fn is_ready(&self) -> bool {
        true
    }
}

/// Arc wrapper for gateway trait objects.
pub type DynGateway = Arc<dyn OrderGateway>;
