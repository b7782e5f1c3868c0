//! Simulated market for paper trading.
//!
//! Mids take a bounded random walk each tick and live on the paper
//! gateway. Resting orders the mid crosses are filled on the venue and the
//! fill is pushed to the lifecycle manager as the venue would.

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use rust_decimal::Decimal;
use tracing::debug;

use quoter_core::{ExecutionEvent, MarketSnapshot, OrderSide, OrderStatus, OrderUpdateEvent, Price};
use quoter_executor::OrderLifecycleManager;
use quoter_gateway::PaperGateway;

use crate::config::{PaperConfig, SymbolConfig};

pub struct PaperMarket {
    config: PaperConfig,
    paper: Arc<PaperGateway>,
    symbols: Vec<String>,
}

impl PaperMarket {
    pub fn new(config: PaperConfig, paper: Arc<PaperGateway>, symbols: &[SymbolConfig]) -> Self {
        for s in symbols {
            paper.set_mid(&s.symbol, Price::new(s.initial_mid));
        }
        Self {
            config,
            paper,
            symbols: symbols.iter().map(|s| s.symbol.clone()).collect(),
        }
    }

    /// Move every mid and return the new snapshots.
    pub fn step(&self, now_ms: u64) -> HashMap<String, MarketSnapshot> {
        let mut rng = rand::rng();
        let mut snapshots = HashMap::with_capacity(self.symbols.len());
        for symbol in &self.symbols {
            let Some(mid) = self.paper.mid(symbol) else {
                continue;
            };
            // Uniform in [-1, 1] with two decimals.
            let unit = Decimal::new(rng.random_range(-100i64..=100), 2);
            let shock = unit * self.config.volatility_bps / Decimal::from(10_000);
            let next = Price::new(mid.0 * (Decimal::ONE + shock));
            self.paper.set_mid(symbol, next);
            snapshots.insert(symbol.clone(), MarketSnapshot::from_mid(symbol, next, now_ms));
        }
        snapshots
    }

    /// Fill resting orders the mid has crossed. Returns the number filled.
    pub fn match_crossed(&self, manager: &OrderLifecycleManager) -> usize {
        if !self.config.fill_on_cross {
            return 0;
        }
        let mut filled = 0;
        for order in manager.active_orders(None) {
            let Some(mid) = self.paper.mid(&order.symbol) else {
                continue;
            };
            let crossed = match order.side {
                OrderSide::Buy => order.price >= mid,
                OrderSide::Sell => order.price <= mid,
            };
            if !crossed || !order.status.is_working() {
                continue;
            }
            if !self.paper.fill(&order.client_order_id) {
                continue;
            }
            manager.handle_execution_update(&ExecutionEvent {
                client_order_id: order.client_order_id.clone(),
                exec_qty: order.remaining_qty(),
                exec_price: order.price,
                is_maker: true,
            });
            manager.handle_order_update(&OrderUpdateEvent {
                client_order_id: order.client_order_id.clone(),
                order_id: Some(order.order_id.clone()),
                status: Some(OrderStatus::Filled),
                cum_filled_qty: Some(order.qty()),
            });
            debug!(cloid = %order.client_order_id, price = %order.price, "Paper fill");
            filled += 1;
        }
        filled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quoter_core::{ManualClock, Size};
    use quoter_executor::{Collaborators, LifecycleConfig, PlaceParams};
    use quoter_risk::{ThrottleConfig, ThrottleGuard};
    use rust_decimal_macros::dec;

    fn symbol() -> SymbolConfig {
        SymbolConfig {
            symbol: "ETHUSDT".into(),
            initial_mid: dec!(2000),
            tick_size: dec!(0.01),
            lot_size: dec!(0.01),
            target: None,
        }
    }

    #[test]
    fn test_step_stays_within_volatility() {
        let paper = Arc::new(PaperGateway::new());
        let market = PaperMarket::new(
            PaperConfig {
                volatility_bps: dec!(10),
                fill_on_cross: true,
            },
            paper,
            &[symbol()],
        );
        for _ in 0..50 {
            let snapshots = market.step(1);
            let mid = snapshots["ETHUSDT"].mid.0;
            assert!(mid > dec!(1800) && mid < dec!(2200));
        }
    }

    #[tokio::test]
    async fn test_crossed_order_is_filled_and_pruned() {
        let clock = Arc::new(ManualClock::new(1_000));
        let paper = Arc::new(PaperGateway::with_clock(clock.clone()));
        let manager = OrderLifecycleManager::new(LifecycleConfig::default(), paper.clone(), clock)
            .with_collaborators(Collaborators {
                throttle: Arc::new(ThrottleGuard::new(ThrottleConfig::default())),
                ..Default::default()
            });
        let market = PaperMarket::new(PaperConfig::default(), paper.clone(), &[symbol()]);

        let crossing = manager
            .place(PlaceParams::limit(
                "ETHUSDT",
                OrderSide::Buy,
                Size::new(dec!(1)),
                Price::new(dec!(2001)),
            ))
            .await
            .unwrap();
        let resting = manager
            .place(PlaceParams::limit(
                "ETHUSDT",
                OrderSide::Buy,
                Size::new(dec!(1)),
                Price::new(dec!(1990)),
            ))
            .await
            .unwrap();

        assert_eq!(market.match_crossed(&manager), 1);
        assert!(manager.get_order(&crossing).is_none());
        assert!(manager.get_order(&resting).is_some());
        assert_eq!(paper.active_count(), 1);
    }
}
