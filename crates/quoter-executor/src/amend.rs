//! Amend eligibility.
//!
//! Pure function of the order, the requested price and size, the
//! instrument grid and the clock. All comparisons use values rounded to
//! the grid, so noise below one tick or lot never disqualifies an amend.

use rust_decimal::Decimal;

use quoter_core::{InstrumentSpec, Order, Price, Size};

/// Thresholds an amend must stay within.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmendPolicy {
    pub min_time_in_book_ms: u64,
    pub price_threshold_bps: Decimal,
    pub size_threshold: Decimal,
}

/// Why an amend was not attempted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ineligible {
    TooYoung { age_ms: u64, min_ms: u64 },
    PriceMove { bps: Decimal },
    SizeChange { ratio: Decimal },
    /// New size would not cover what is already filled.
    BelowFilled,
    /// Order has no usable reference price or size.
    NoReference,
}

impl Ineligible {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TooYoung { .. } => "too_young",
            Self::PriceMove { .. } => "price_move",
            Self::SizeChange { .. } => "size_change",
            Self::BelowFilled => "below_filled",
            Self::NoReference => "no_reference",
        }
    }
}

/// Rounded target of an eligible amend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmendTarget {
    pub price: Price,
    pub qty: Size,
}

/// Decide whether `order` can be amended to `new_price` / `new_qty`.
///
/// Dwell is checked first: an order younger than the minimum time in book
/// is ineligible whatever the requested change.
pub fn evaluate(
    order: &Order,
    new_price: Option<Price>,
    new_qty: Option<Size>,
    spec: &InstrumentSpec,
    policy: &AmendPolicy,
    now_ms: u64,
) -> Result<AmendTarget, Ineligible> {
    let age_ms = order.age_ms(now_ms);
    if age_ms < policy.min_time_in_book_ms {
        return Err(Ineligible::TooYoung {
            age_ms,
            min_ms: policy.min_time_in_book_ms,
        });
    }

    let current_price = spec.round_price(order.price);
    let current_qty = spec.round_qty(order.qty());

    let price = match new_price {
        Some(p) => {
            let rounded = spec.round_price(p);
            let bps = rounded
                .bps_distance(current_price)
                .ok_or(Ineligible::NoReference)?;
            if bps > policy.price_threshold_bps {
                return Err(Ineligible::PriceMove { bps });
            }
            rounded
        }
        None => current_price,
    };

    let qty = match new_qty {
        Some(q) => {
            let rounded = spec.round_qty(q);
            if current_qty.is_zero() {
                return Err(Ineligible::NoReference);
            }
            let ratio = ((rounded.0 - current_qty.0) / current_qty.0).abs();
            if ratio > policy.size_threshold {
                return Err(Ineligible::SizeChange { ratio });
            }
            if rounded < order.filled_qty() || !rounded.is_positive() {
                return Err(Ineligible::BelowFilled);
            }
            rounded
        }
        None => current_qty,
    };

    Ok(AmendTarget { price, qty })
}

#[cfg(test)]
mod tests {
    use super::*;
    use quoter_core::{ClientOrderId, OrderRequest, OrderSide};
    use rust_decimal_macros::dec;

    fn order(price: Decimal, qty: Decimal, created_ms: u64) -> Order {
        let req = OrderRequest::limit("BTCUSDT", OrderSide::Buy, Size::new(qty), Price::new(price));
        Order::new(ClientOrderId::from("c1"), "o1".into(), &req, created_ms)
    }

    fn spec() -> InstrumentSpec {
        InstrumentSpec::new(dec!(0.1), dec!(0.001))
    }

    fn policy() -> AmendPolicy {
        AmendPolicy {
            min_time_in_book_ms: 500,
            price_threshold_bps: dec!(1),
            size_threshold: dec!(0.2),
        }
    }

    #[test]
    fn test_young_order_is_always_ineligible() {
        let o = order(dec!(50000), dec!(0.1), 1_000);
        for (p, q) in [
            (None, None),
            (Some(dec!(50000)), None),
            (Some(dec!(60000)), Some(dec!(5))),
        ] {
            let res = evaluate(
                &o,
                p.map(Price::new),
                q.map(Size::new),
                &spec(),
                &policy(),
                1_200,
            );
            assert!(matches!(res, Err(Ineligible::TooYoung { .. })));
        }
    }

    #[test]
    fn test_sub_tick_move_rounds_to_same_price() {
        let o = order(dec!(50000.0), dec!(0.1), 0);
        let target = evaluate(
            &o,
            Some(Price::new(dec!(50000.05))),
            None,
            &spec(),
            &policy(),
            1_000,
        )
        .unwrap();
        assert_eq!(target.price.0, dec!(50000.0));
        assert_eq!(target.qty.0, dec!(0.1));
    }

    #[test]
    fn test_price_move_over_threshold() {
        let o = order(dec!(50000), dec!(0.1), 0);
        // 10 bps
        let res = evaluate(
            &o,
            Some(Price::new(dec!(50050))),
            None,
            &spec(),
            &policy(),
            1_000,
        );
        assert!(matches!(res, Err(Ineligible::PriceMove { .. })));
    }

    #[test]
    fn test_size_change_threshold() {
        let o = order(dec!(50000), dec!(1), 0);
        assert!(evaluate(&o, None, Some(Size::new(dec!(1.2))), &spec(), &policy(), 1_000).is_ok());
        let res = evaluate(&o, None, Some(Size::new(dec!(1.5))), &spec(), &policy(), 1_000);
        assert!(matches!(res, Err(Ineligible::SizeChange { .. })));
    }

    #[test]
    fn test_below_filled() {
        let mut o = order(dec!(50000), dec!(1), 0);
        o.apply_cumulative_fill(Size::new(dec!(0.9)), 10);
        let res = evaluate(&o, None, Some(Size::new(dec!(0.85))), &spec(), &policy(), 1_000);
        assert_eq!(res, Err(Ineligible::BelowFilled));
    }
}
