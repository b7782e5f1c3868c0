//! Locally tracked orders and the push events that mutate them.
//!
//! `Order` keeps `remaining_qty = qty - filled_qty` on every mutation path:
//! the three quantities are private and only change through the methods
//! below.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::decimal::{Price, Size};
use crate::error::CoreError;
use crate::order::{ClientOrderId, OrderRequest, OrderSide, OrderType, TimeInForce};

// ============================================================================
// OrderStatus
// ============================================================================

/// Status of a locally tracked order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    /// Transient marker while a cancel-then-place is in flight.
    Replaced,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// Filled, Cancelled and Rejected leave the active table.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }

    /// Still expected to rest on the venue.
    pub fn is_working(&self) -> bool {
        matches!(self, Self::New | Self::PartiallyFilled)
    }

    /// Whether the state machine allows `self -> next`.
    ///
    /// Re-asserting the current state is always allowed.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        if *self == next {
            return true;
        }
        match self {
            New => matches!(
                next,
                PartiallyFilled | Filled | Cancelled | Rejected | Replaced
            ),
            PartiallyFilled => matches!(next, Filled | Cancelled | Replaced),
            Replaced => matches!(next, New | PartiallyFilled | Filled | Cancelled | Rejected),
            Filled | Cancelled | Rejected => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "New",
            Self::PartiallyFilled => "PartiallyFilled",
            Self::Replaced => "Replaced",
            Self::Filled => "Filled",
            Self::Cancelled => "Cancelled",
            Self::Rejected => "Rejected",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses both our own names and the venue's status vocabulary.
impl FromStr for OrderStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "New" | "Created" | "Untriggered" | "Active" => Ok(Self::New),
            "PartiallyFilled" => Ok(Self::PartiallyFilled),
            "Replaced" => Ok(Self::Replaced),
            "Filled" => Ok(Self::Filled),
            "Cancelled" | "Canceled" | "PartiallyFilledCanceled" | "Deactivated" => {
                Ok(Self::Cancelled)
            }
            "Rejected" => Ok(Self::Rejected),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

// ============================================================================
// Cohort
// ============================================================================

/// Routing cohort for experimentation. Blue is the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cohort {
    #[default]
    Blue,
    Green,
}

impl Cohort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blue => "blue",
            Self::Green => "green",
        }
    }
}

impl fmt::Display for Cohort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Order
// ============================================================================

/// An order the local table believes is resting on the venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Venue id, empty until acknowledged.
    pub order_id: String,
    pub client_order_id: ClientOrderId,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub price: Price,
    qty: Size,
    filled_qty: Size,
    remaining_qty: Size,
    pub status: OrderStatus,
    #[serde(default)]
    pub cohort: Cohort,
    pub created_ms: u64,
    pub last_update_ms: u64,
    #[serde(default)]
    pub last_fill_price: Option<Price>,
}

impl Order {
    /// A freshly acknowledged order.
    pub fn new(
        client_order_id: ClientOrderId,
        order_id: String,
        request: &OrderRequest,
        now_ms: u64,
    ) -> Self {
        Self {
            order_id,
            client_order_id,
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            time_in_force: request.time_in_force,
            price: request.price.unwrap_or_default(),
            qty: request.qty,
            filled_qty: Size::ZERO,
            remaining_qty: request.qty,
            status: OrderStatus::New,
            cohort: Cohort::default(),
            created_ms: now_ms,
            last_update_ms: now_ms,
            last_fill_price: None,
        }
    }

    pub fn with_cohort(mut self, cohort: Cohort) -> Self {
        self.cohort = cohort;
        self
    }

    #[inline]
    pub fn qty(&self) -> Size {
        self.qty
    }

    #[inline]
    pub fn filled_qty(&self) -> Size {
        self.filled_qty
    }

    #[inline]
    pub fn remaining_qty(&self) -> Size {
        self.remaining_qty
    }

    /// Milliseconds since the order was acknowledged.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_ms)
    }

    /// `price * remaining_qty`.
    pub fn remaining_notional(&self) -> rust_decimal::Decimal {
        self.remaining_qty.notional(self.price)
    }

    /// Clamp fills to the order size and recompute the remainder.
    fn settle(&mut self) {
        if self.filled_qty > self.qty {
            self.filled_qty = self.qty;
        }
        if self.filled_qty < Size::ZERO {
            self.filled_qty = Size::ZERO;
        }
        self.remaining_qty = self.qty.saturating_sub(self.filled_qty);
    }

    /// Re-establish the quantity invariant after deserialization.
    pub fn normalize(&mut self) {
        self.settle();
    }

    /// Move to `next` if the state machine allows it.
    pub fn set_status(&mut self, next: OrderStatus, now_ms: u64) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.last_update_ms = now_ms;
        true
    }

    /// Apply an acknowledged amend. Prices and sizes are already rounded.
    pub fn apply_amend(&mut self, price: Price, qty: Size, now_ms: u64) {
        self.price = price;
        self.qty = qty;
        self.settle();
        self.last_update_ms = now_ms;
    }

    /// Apply a cumulative fill quantity. Returns true if the fill grew.
    ///
    /// Status follows the fill: fully filled orders become `Filled`,
    /// anything else with a fill becomes `PartiallyFilled`.
    pub fn apply_cumulative_fill(&mut self, cum_filled: Size, now_ms: u64) -> bool {
        if cum_filled <= self.filled_qty {
            return false;
        }
        self.filled_qty = cum_filled;
        self.settle();
        self.last_update_ms = now_ms;
        let next = if self.remaining_qty.is_zero() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        if self.status.can_transition_to(next) {
            self.status = next;
        }
        true
    }

    /// Treat the order as completely filled.
    pub fn mark_filled(&mut self, now_ms: u64) {
        self.filled_qty = self.qty;
        self.settle();
        self.status = OrderStatus::Filled;
        self.last_update_ms = now_ms;
    }

    pub fn mark_cancelled(&mut self, now_ms: u64) {
        self.status = OrderStatus::Cancelled;
        self.last_update_ms = now_ms;
    }

    /// Take status and quantities from the venue, which is authoritative.
    ///
    /// The order size becomes `filled + remaining` so the invariant holds
    /// even if the venue reports a size we never sent.
    pub fn overwrite_from_remote(
        &mut self,
        status: OrderStatus,
        filled_qty: Size,
        remaining_qty: Size,
        now_ms: u64,
    ) {
        self.qty = filled_qty + remaining_qty;
        self.filled_qty = filled_qty;
        self.settle();
        self.status = status;
        self.last_update_ms = now_ms;
    }

    /// Whether the venue view differs on any field reconciliation owns.
    pub fn diverges_from(&self, status: OrderStatus, filled: Size, remaining: Size) -> bool {
        self.status != status || self.filled_qty != filled || self.remaining_qty != remaining
    }
}

// ============================================================================
// Push events
// ============================================================================

/// Order state change pushed by the venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdateEvent {
    pub client_order_id: ClientOrderId,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub status: Option<OrderStatus>,
    /// Cumulative executed quantity.
    #[serde(default)]
    pub cum_filled_qty: Option<Size>,
}

/// Single execution pushed by the venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub client_order_id: ClientOrderId,
    pub exec_qty: Size,
    pub exec_price: Price,
    #[serde(default)]
    pub is_maker: bool,
}
