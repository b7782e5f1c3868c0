//! Latest mid price per symbol.

use dashmap::DashMap;

use quoter_core::{MarketSnapshot, Price};

/// Cached mid price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MidQuote {
    pub mid: Price,
    /// Snapshot timestamp (Unix milliseconds).
    pub updated_ms: u64,
}

/// Thread-safe cache of mid prices, fed by market snapshots.
#[derive(Debug, Default)]
pub struct MidPriceCache {
    quotes: DashMap<String, MidQuote>,
}

impl MidPriceCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, symbol: &str, mid: Price, now_ms: u64) {
        if !mid.is_positive() {
            return;
        }
        self.quotes.insert(
            symbol.to_string(),
            MidQuote {
                mid,
                updated_ms: now_ms,
            },
        );
    }

    pub fn update_from_snapshot(&self, snapshot: &MarketSnapshot) {
        self.update(&snapshot.symbol, snapshot.mid, snapshot.ts_ms);
    }

    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<MidQuote> {
        self.quotes.get(symbol).map(|q| *q)
    }

    /// Mid no older than `max_age_ms`.
    #[must_use]
    pub fn fresh_mid(&self, symbol: &str, now_ms: u64, max_age_ms: u64) -> Option<Price> {
        self.get(symbol)
            .filter(|q| now_ms.saturating_sub(q.updated_ms) <= max_age_ms)
            .map(|q| q.mid)
    }

    pub fn remove(&self, symbol: &str) {
        self.quotes.remove(symbol);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }
}
