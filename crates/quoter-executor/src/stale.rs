//! Anti-stale sweep policy and its summary.
//!
//! An order is stale when it outlives the TTL, or when its price drifted
//! from the current mid by more than the drift threshold. TTL wins when
//! both apply.

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use quoter_core::{ClientOrderId, Order, OrderSide, Price};

use crate::config::LifecycleConfig;

/// Age bucket labels, shortest first.
pub const AGE_BUCKETS: [&str; 5] = ["<0.5s", "0.5-1s", "1-2s", "2-5s", ">5s"];

pub fn age_bucket(age_ms: u64) -> &'static str {
    match age_ms {
        0..=499 => AGE_BUCKETS[0],
        500..=999 => AGE_BUCKETS[1],
        1_000..=1_999 => AGE_BUCKETS[2],
        2_000..=4_999 => AGE_BUCKETS[3],
        _ => AGE_BUCKETS[4],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    TtlExpired,
    PriceDrift,
}

impl StaleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TtlExpired => "ttl_expired",
            Self::PriceDrift => "price_drift",
        }
    }
}

/// Whether `order` is stale at `now_ms`, with the drift in bps when the
/// reason is drift.
pub fn classify(
    order: &Order,
    mid: Option<Price>,
    config: &LifecycleConfig,
    now_ms: u64,
) -> Option<(StaleReason, Option<Decimal>)> {
    if order.age_ms(now_ms) > config.order_ttl_ms {
        return Some((StaleReason::TtlExpired, None));
    }
    let drift = order.price.bps_distance(mid?)?;
    if drift > config.price_drift_bps {
        Some((StaleReason::PriceDrift, Some(drift)))
    } else {
        None
    }
}

/// Refresh target on the resting side of `mid`, half the drift threshold
/// away, so a refreshed order does not immediately count as drifted again.
///
/// A buy is never moved above mid nor a sell below it: the refresh is
/// re-placed as the same resting order and on the far side it would cross
/// the book, which a post-only venue rejects.
pub fn refresh_price(mid: Price, side: OrderSide, drift_bps: Decimal) -> Price {
    let offset = drift_bps / Decimal::TWO / Decimal::from(10_000);
    let factor = match side {
        OrderSide::Buy => Decimal::ONE - offset,
        OrderSide::Sell => Decimal::ONE + offset,
    };
    Price::new(mid.0 * factor)
}

/// What the sweep did with one stale order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleOutcome {
    Cancelled,
    /// Repriced toward the mid, possibly as a new order.
    Refreshed { client_order_id: ClientOrderId },
    /// Drifted but the mid vanished; cancelled instead.
    CancelledWithoutMid,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StaleAction {
    pub client_order_id: ClientOrderId,
    pub symbol: String,
    pub reason: StaleReason,
    pub drift_bps: Option<Decimal>,
    pub outcome: StaleOutcome,
}

impl StaleAction {
    pub fn succeeded(&self) -> bool {
        !matches!(self.outcome, StaleOutcome::Failed(_))
    }
}

/// Result of one anti-stale sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StaleSweepSummary {
    pub enabled: bool,
    pub symbol: Option<String>,
    pub checked: usize,
    pub ttl_cancels: usize,
    pub drift_refreshes: usize,
    pub errors: usize,
    pub actions: Vec<StaleAction>,
    /// Checked orders per age bucket.
    pub age_buckets: BTreeMap<&'static str, usize>,
}

impl StaleSweepSummary {
    pub fn disabled(symbol: Option<&str>) -> Self {
        Self {
            enabled: false,
            symbol: symbol.map(str::to_string),
            ..Default::default()
        }
    }

    pub fn enabled(symbol: Option<&str>) -> Self {
        Self {
            enabled: true,
            symbol: symbol.map(str::to_string),
            ..Default::default()
        }
    }

    pub fn record_age(&mut self, age_ms: u64) {
        *self.age_buckets.entry(age_bucket(age_ms)).or_default() += 1;
    }

    pub fn record(&mut self, action: StaleAction) {
        match (&action.reason, action.succeeded()) {
            (_, false) => self.errors += 1,
            (StaleReason::TtlExpired, true) => self.ttl_cancels += 1,
            (StaleReason::PriceDrift, true) => self.drift_refreshes += 1,
        }
        self.actions.push(action);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quoter_core::{OrderRequest, Size};
    use rust_decimal_macros::dec;

    fn order(side: OrderSide, price: Decimal, created_ms: u64) -> Order {
        let req = OrderRequest::limit("BTCUSDT", side, Size::new(dec!(1)), Price::new(price));
        Order::new(ClientOrderId::from("c"), "o".into(), &req, created_ms)
    }

    #[test]
    fn test_age_buckets() {
        assert_eq!(age_bucket(0), "<0.5s");
        assert_eq!(age_bucket(500), "0.5-1s");
        assert_eq!(age_bucket(1_999), "1-2s");
        assert_eq!(age_bucket(4_999), "2-5s");
        assert_eq!(age_bucket(5_000), ">5s");
    }

    #[test]
    fn test_ttl_wins_over_drift() {
        let config = LifecycleConfig::default();
        let o = order(OrderSide::Buy, dec!(100), 0);
        let res = classify(&o, Some(Price::new(dec!(200))), &config, 801);
        assert_eq!(res, Some((StaleReason::TtlExpired, None)));
    }

    #[test]
    fn test_drift_needs_mid() {
        let config = LifecycleConfig::default();
        let o = order(OrderSide::Buy, dec!(100), 0);
        assert_eq!(classify(&o, None, &config, 100), None);
        // 10 bps away
        let (reason, bps) = classify(&o, Some(Price::new(dec!(100.1))), &config, 100).unwrap();
        assert_eq!(reason, StaleReason::PriceDrift);
        assert!(bps.unwrap() > dec!(9.9));
        // 1 bp away is fine
        assert_eq!(classify(&o, Some(Price::new(dec!(100.01))), &config, 100), None);
    }

    #[test]
    fn test_refresh_price_side_aware() {
        let mid = Price::new(dec!(10000));
        assert_eq!(refresh_price(mid, OrderSide::Buy, dec!(2)).0, dec!(9999));
        assert_eq!(refresh_price(mid, OrderSide::Sell, dec!(2)).0, dec!(10001));
    }

    #[test]
    fn test_refreshed_order_rests_and_is_not_stale() {
        let config = LifecycleConfig::default();
        let mid = Price::new(dec!(10000));
        for side in [OrderSide::Buy, OrderSide::Sell] {
            let price = refresh_price(mid, side, config.price_drift_bps);
            match side {
                OrderSide::Buy => assert!(price < mid),
                OrderSide::Sell => assert!(price > mid),
            }
            let refreshed = order(side, price.0, 0);
            assert_eq!(classify(&refreshed, Some(mid), &config, 100), None);
        }
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = StaleSweepSummary::enabled(None);
        let base = StaleAction {
            client_order_id: ClientOrderId::from("a"),
            symbol: "BTCUSDT".into(),
            reason: StaleReason::TtlExpired,
            drift_bps: None,
            outcome: StaleOutcome::Cancelled,
        };
        summary.record(base.clone());
        summary.record(StaleAction {
            reason: StaleReason::PriceDrift,
            outcome: StaleOutcome::CancelledWithoutMid,
            ..base.clone()
        });
        summary.record(StaleAction {
            outcome: StaleOutcome::Failed("boom".into()),
            ..base
        });
        assert_eq!(
            (summary.ttl_cancels, summary.drift_refreshes, summary.errors),
            (1, 1, 1)
        );
    }
}
