//! Instrument grids and market snapshots.

use dashmap::DashMap;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::decimal::{Price, Size};

/// Tick and lot grid of one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    pub tick_size: Price,
    pub lot_size: Size,
    /// Smallest accepted order size.
    #[serde(default)]
    pub min_qty: Size,
}

impl Default for InstrumentSpec {
    fn default() -> Self {
        Self {
            tick_size: Price::new(dec!(0.01)),
            lot_size: Size::new(dec!(0.01)),
            min_qty: Size::ZERO,
        }
    }
}

impl InstrumentSpec {
    pub fn new(tick_size: Decimal, lot_size: Decimal) -> Self {
        Self {
            tick_size: Price::new(tick_size),
            lot_size: Size::new(lot_size),
            min_qty: Size::ZERO,
        }
    }

    #[inline]
    pub fn round_price(&self, price: Price) -> Price {
        price.round_to_tick(self.tick_size)
    }

    #[inline]
    pub fn round_qty(&self, qty: Size) -> Size {
        qty.round_to_lot(self.lot_size)
    }
}

/// Instrument grids by symbol, with a fallback for unknown symbols.
#[derive(Debug, Default)]
pub struct InstrumentRegistry {
    specs: DashMap<String, InstrumentSpec>,
    fallback: InstrumentSpec,
}

impl InstrumentRegistry {
    pub fn new(fallback: InstrumentSpec) -> Self {
        Self {
            specs: DashMap::new(),
            fallback,
        }
    }

    pub fn insert(&self, symbol: impl Into<String>, spec: InstrumentSpec) {
        self.specs.insert(symbol.into(), spec);
    }

    /// Spec for `symbol`, or the fallback grid.
    pub fn get(&self, symbol: &str) -> InstrumentSpec {
        match self.specs.get(symbol) {
            Some(spec) => *spec,
            None => {
                debug!(symbol = %symbol, "No instrument spec, using fallback grid");
                self.fallback
            }
        }
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.specs.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// Top of book for one symbol at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub mid: Price,
    #[serde(default)]
    pub best_bid: Option<Price>,
    #[serde(default)]
    pub best_ask: Option<Price>,
    pub ts_ms: u64,
}

impl MarketSnapshot {
    pub fn from_mid(symbol: impl Into<String>, mid: Price, ts_ms: u64) -> Self {
        Self {
            symbol: symbol.into(),
            mid,
            best_bid: None,
            best_ask: None,
            ts_ms,
        }
    }

    /// Snapshot from a two-sided book; mid is the arithmetic mean.
    pub fn from_bbo(symbol: impl Into<String>, bid: Price, ask: Price, ts_ms: u64) -> Self {
        Self {
            symbol: symbol.into(),
            mid: Price::new((bid.0 + ask.0) / Decimal::TWO),
            best_bid: Some(bid),
            best_ask: Some(ask),
            ts_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_fallback() {
        let registry = InstrumentRegistry::new(InstrumentSpec::default());
        registry.insert("BTCUSDT", InstrumentSpec::new(dec!(0.1), dec!(0.001)));

        assert_eq!(registry.get("BTCUSDT").tick_size.0, dec!(0.1));
        assert_eq!(registry.get("DOGEUSDT").tick_size.0, dec!(0.01));
        assert!(registry.contains("BTCUSDT"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_spec_rounding() {
        let spec = InstrumentSpec::new(dec!(0.1), dec!(0.001));
        assert_eq!(spec.round_price(Price::new(dec!(50000.05))).0, dec!(50000));
        assert_eq!(spec.round_qty(Size::new(dec!(0.1004))).0, dec!(0.1));
    }

    #[test]
    fn test_snapshot_from_bbo() {
        let snap = MarketSnapshot::from_bbo(
            "ETHUSDT",
            Price::new(dec!(2999.5)),
            Price::new(dec!(3000.5)),
            1,
        );
        assert_eq!(snap.mid.0, dec!(3000));
    }
}
