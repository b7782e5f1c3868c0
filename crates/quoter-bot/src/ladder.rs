//! Symmetric quote ladder.
//!
//! Level `i` (1-based) rests `i * spacing_bps` away from the mid on each
//! side. Resting orders are matched to levels nearest-first: a matching
//! price is left alone, a different price becomes an amend, a missing
//! level becomes a place and a surplus order becomes a cancel.

use rust_decimal::Decimal;

use quoter_core::{MarketSnapshot, Order, OrderSide, Price, Size, TimeInForce};
use quoter_executor::{Intent, IntentGenerator, OrderLifecycleManager, OrderResult, PlaceParams};
use quoter_gateway::BoxFuture;

use crate::config::LadderConfig;

pub struct LadderGenerator {
    config: LadderConfig,
}

impl LadderGenerator {
    pub fn new(config: LadderConfig) -> Self {
        Self { config }
    }

    fn level_price(mid: Price, side: OrderSide, bps: Decimal) -> Price {
        let offset = bps / Decimal::from(10_000);
        let factor = match side {
            OrderSide::Buy => Decimal::ONE - offset,
            OrderSide::Sell => Decimal::ONE + offset,
        };
        Price::new(mid.0 * factor)
    }

    /// Intents that move the book of `symbol` to the ladder around `mid`.
    pub fn plan(&self, symbol: &str, mid: Price, manager: &OrderLifecycleManager) -> Vec<Intent> {
        let spec = manager.instruments().get(symbol);
        let qty = Size::new(self.config.level_qty);
        let resting = manager.active_orders(Some(symbol));
        let mut intents = Vec::new();

        for side in [OrderSide::Buy, OrderSide::Sell] {
            let mut book: Vec<&Order> = resting
                .iter()
                .filter(|o| o.side == side && o.status.is_working())
                .collect();
            book.sort_by_key(|o| (o.price.0 - mid.0).abs());

            for level in 1..=self.config.levels {
                let bps = self.config.spacing_bps * Decimal::from(level);
                let price = spec.round_price(Self::level_price(mid, side, bps));
                match book.get(level as usize - 1) {
                    Some(order) if order.price == price => {}
                    Some(order) => intents.push(Intent::Amend {
                        client_order_id: order.client_order_id.clone(),
                        price: Some(price),
                        qty: None,
                    }),
                    None => intents.push(Intent::Place(
                        PlaceParams::limit(symbol, side, qty, price).with_tif(TimeInForce::PostOnly),
                    )),
                }
            }
            for surplus in book.iter().skip(self.config.levels as usize) {
                intents.push(Intent::Cancel(surplus.client_order_id.clone()));
            }
        }
        intents
    }
}

impl IntentGenerator for LadderGenerator {
    fn generate<'a>(
        &'a self,
        symbol: &'a str,
        snapshot: &'a MarketSnapshot,
        manager: &'a OrderLifecycleManager,
    ) -> BoxFuture<'a, OrderResult<Vec<Intent>>> {
        Box::pin(async move { Ok(self.plan(symbol, snapshot.mid, manager)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quoter_core::{InstrumentSpec, ManualClock};
    use quoter_executor::{Collaborators, LifecycleConfig};
    use quoter_gateway::PaperGateway;
    use quoter_risk::{ThrottleConfig, ThrottleGuard};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn manager() -> OrderLifecycleManager {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let paper = Arc::new(PaperGateway::with_clock(clock.clone()));
        let manager = OrderLifecycleManager::new(LifecycleConfig::default(), paper, clock)
            .with_collaborators(Collaborators {
                throttle: Arc::new(ThrottleGuard::new(ThrottleConfig {
                    max_creates_per_sec: 100,
                    ..Default::default()
                })),
                ..Default::default()
            });
        manager
            .instruments()
            .insert("BTCUSDT", InstrumentSpec::new(dec!(0.1), dec!(0.001)));
        manager
    }

    fn ladder(levels: u32) -> LadderGenerator {
        LadderGenerator::new(LadderConfig {
            levels,
            spacing_bps: dec!(10),
            level_qty: dec!(0.01),
        })
    }

    #[test]
    fn test_empty_book_places_every_level() {
        let m = manager();
        let intents = ladder(2).plan("BTCUSDT", Price::new(dec!(50000)), &m);
        let prices: Vec<Decimal> = intents
            .iter()
            .map(|i| match i {
                Intent::Place(p) => p.price.unwrap().0,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(prices, vec![dec!(49950), dec!(49900), dec!(50050), dec!(50100)]);
    }

    #[tokio::test]
    async fn test_matching_book_is_left_alone_and_moves_amend() {
        let m = manager();
        let g = ladder(1);
        for intent in g.plan("BTCUSDT", Price::new(dec!(50000)), &m) {
            if let Intent::Place(p) = intent {
                m.place(p).await.unwrap();
            }
        }
        assert!(g.plan("BTCUSDT", Price::new(dec!(50000)), &m).is_empty());

        let moved = g.plan("BTCUSDT", Price::new(dec!(50010)), &m);
        assert_eq!(moved.len(), 2);
        assert!(moved.iter().all(|i| matches!(i, Intent::Amend { .. })));
    }

    #[tokio::test]
    async fn test_surplus_orders_are_cancelled() {
        let m = manager();
        for intent in ladder(3).plan("BTCUSDT", Price::new(dec!(50000)), &m) {
            if let Intent::Place(p) = intent {
                m.place(p).await.unwrap();
            }
        }
        let shrunk = ladder(1).plan("BTCUSDT", Price::new(dec!(50000)), &m);
        let cancels = shrunk.iter().filter(|i| matches!(i, Intent::Cancel(_))).count();
        assert_eq!(cancels, 4);
        assert_eq!(shrunk.len(), 4);
    }
}
