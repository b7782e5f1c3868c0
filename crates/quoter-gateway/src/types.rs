//! Requests, acknowledgements and snapshots exchanged with the venue.

use serde::{Deserialize, Serialize};

use quoter_core::{ClientOrderId, OrderRequest, OrderSide, OrderStatus, Price, Size};

use crate::error::GatewayResult;

/// New order with its client id attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceRequest {
    pub client_order_id: ClientOrderId,
    pub order: OrderRequest,
}

impl PlaceRequest {
    pub fn symbol(&self) -> &str {
        &self.order.symbol
    }
}

/// Venue acknowledgement of a place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceAck {
    pub order_id: String,
    /// Echoed client id. Normally the one we sent.
    pub client_order_id: ClientOrderId,
}

/// Which order to cancel. At least one id must be set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CancelTarget {
    pub symbol: String,
    pub order_id: Option<String>,
    pub client_order_id: Option<ClientOrderId>,
}

impl CancelTarget {
    pub fn by_client_id(symbol: impl Into<String>, client_order_id: ClientOrderId) -> Self {
        Self {
            symbol: symbol.into(),
            order_id: None,
            client_order_id: Some(client_order_id),
        }
    }

    pub fn by_order_id(symbol: impl Into<String>, order_id: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            order_id: Some(order_id.into()),
            client_order_id: None,
        }
    }

    pub fn has_id(&self) -> bool {
        self.order_id.as_deref().is_some_and(|id| !id.is_empty())
            || self.client_order_id.as_ref().is_some_and(|id| !id.is_empty())
    }
}

/// In-place modification of a resting order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmendRequest {
    pub symbol: String,
    pub order_id: Option<String>,
    pub client_order_id: Option<ClientOrderId>,
    pub price: Option<Price>,
    pub qty: Option<Size>,
}

/// Venue view of one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub order_id: String,
    pub client_order_id: ClientOrderId,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Price,
    pub qty: Size,
    pub filled_qty: Size,
    pub remaining_qty: Size,
    pub status: OrderStatus,
    pub created_ms: u64,
    pub updated_ms: u64,
}

/// Per-item results of a batch call, in request order.
#[derive(Debug, Clone)]
pub struct BatchOutcome<T> {
    pub results: Vec<GatewayResult<T>>,
}

impl<T> Default for BatchOutcome<T> {
    fn default() -> Self {
        Self {
            results: Vec::new(),
        }
    }
}

impl<T> BatchOutcome<T> {
    pub fn new(results: Vec<GatewayResult<T>>) -> Self {
        Self { results }
    }

    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.len() - self.success_count()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
