//! Capacity budgets handed in by the portfolio allocator.
//!
//! The execution core only reads these. The allocator swaps the whole map
//! at once, so readers always see one consistent generation.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Budget for one symbol: USD notional and resting levels per side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioTarget {
    pub target_usd: Decimal,
    pub max_levels: u32,
}

/// Read-mostly map of per-symbol targets.
#[derive(Debug, Default)]
pub struct PortfolioTargets {
    inner: RwLock<Arc<HashMap<String, PortfolioTarget>>>,
}

impl PortfolioTargets {
    pub fn new(targets: HashMap<String, PortfolioTarget>) -> Self {
        Self {
            inner: RwLock::new(Arc::new(targets)),
        }
    }

    /// Replace all targets with a new generation.
    pub fn replace(&self, targets: HashMap<String, PortfolioTarget>) {
        *self.inner.write() = Arc::new(targets);
    }

    pub fn get(&self, symbol: &str) -> Option<PortfolioTarget> {
        self.inner.read().get(symbol).copied()
    }

    /// Current generation.
    pub fn snapshot(&self) -> Arc<HashMap<String, PortfolioTarget>> {
        Arc::clone(&self.inner.read())
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.inner.read().keys().cloned().collect();
        symbols.sort();
        symbols
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_replace_swaps_generation() {
        let targets = PortfolioTargets::default();
        assert!(targets.get("BTCUSDT").is_none());

        let old = targets.snapshot();
        targets.replace(HashMap::from([(
            "BTCUSDT".to_string(),
            PortfolioTarget {
                target_usd: dec!(10000),
                max_levels: 3,
            },
        )]));

        assert!(old.is_empty());
        assert_eq!(targets.get("BTCUSDT").unwrap().max_levels, 3);
        assert_eq!(targets.symbols(), vec!["BTCUSDT".to_string()]);
    }
}
