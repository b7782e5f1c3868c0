//! Order sides, types, time-in-force and client order ids.

use crate::decimal::{Price, Size};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// 1 for buy, -1 for sell.
    pub fn sign(&self) -> i8 {
        match self {
            Self::Buy => 1,
            Self::Sell => -1,
        }
    }

    /// Single-letter tag used inside client order ids.
    pub fn short(&self) -> &'static str {
        match self {
            Self::Buy => "b",
            Self::Sell => "s",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    #[default]
    Limit,
    Market,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limit => write!(f, "limit"),
            Self::Market => write!(f, "market"),
        }
    }
}

/// Time-in-force for resting orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good-til-cancelled.
    #[default]
    #[serde(rename = "GTC")]
    GoodTilCancelled,
    /// Immediate-or-cancel.
    #[serde(rename = "IOC")]
    ImmediateOrCancel,
    /// Maker only; rejected if it would cross.
    #[serde(rename = "PostOnly")]
    PostOnly,
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GoodTilCancelled => write!(f, "GTC"),
            Self::ImmediateOrCancel => write!(f, "IOC"),
            Self::PostOnly => write!(f, "PostOnly"),
        }
    }
}

/// Client order id: the primary key of every local order lookup.
///
/// Fresh ids come from [`crate::IdAllocator`]; this type only wraps and
/// compares them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientOrderId(String);

impl ClientOrderId {
    /// Wrap an existing id (venue responses, push events, config pins).
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ClientOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ClientOrderId {
    fn from(s: String) -> Self {
        Self::from_string(s)
    }
}

impl From<&str> for ClientOrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ClientOrderId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Parameters of a new order before an id is attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    #[serde(default)]
    pub order_type: OrderType,
    pub qty: Size,
    /// Required for limit orders.
    #[serde(default)]
    pub price: Option<Price>,
    #[serde(default)]
    pub time_in_force: TimeInForce,
}

impl OrderRequest {
    /// A GTC limit order.
    pub fn limit(symbol: impl Into<String>, side: OrderSide, qty: Size, price: Price) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            qty,
            price: Some(price),
            time_in_force: TimeInForce::GoodTilCancelled,
        }
    }

    /// Notional at the order price, zero for market orders.
    pub fn notional(&self) -> rust_decimal::Decimal {
        self.price.map(|p| self.qty.notional(p)).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_helpers() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.sign(), -1);
        assert_eq!(OrderSide::Buy.short(), "b");
        assert_eq!(OrderSide::Sell.to_string(), "sell");
    }

    #[test]
    fn test_client_order_id_roundtrip() {
        let id = ClientOrderId::from("BTCUSDT-b-1-1-abcd");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"BTCUSDT-b-1-1-abcd\"");
        let back: ClientOrderId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_limit_request_notional() {
        let req = OrderRequest::limit(
            "BTCUSDT",
            OrderSide::Buy,
            Size::new(dec!(0.1)),
            Price::new(dec!(50000)),
        );
        assert_eq!(req.notional(), dec!(5000));
        assert_eq!(req.time_in_force, TimeInForce::GoodTilCancelled);
    }
}
