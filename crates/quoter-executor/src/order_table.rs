//! The active order table.
//!
//! Single shared mutable resource of the execution core. Every access
//! takes the mutex for one bounded critical section; callers clone what
//! they need and release the lock before any network call. The guard is
//! `!Send`, so holding it across an `.await` in a spawned task does not
//! compile.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use parking_lot::Mutex;
use rust_decimal::Decimal;

use quoter_core::{ClientOrderId, Order, OrderSide};

#[derive(Debug, Default)]
pub struct OrderTable {
    orders: Mutex<HashMap<ClientOrderId, Order>>,
}

impl OrderTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. Returns the previous entry.
    pub fn insert(&self, order: Order) -> Option<Order> {
        self.orders
            .lock()
            .insert(order.client_order_id.clone(), order)
    }

    /// Insert only if the id is not already tracked. Hands the order back
    /// on a collision.
    pub fn insert_new(&self, order: Order) -> Result<(), Order> {
        match self.orders.lock().entry(order.client_order_id.clone()) {
            Entry::Occupied(_) => Err(order),
            Entry::Vacant(slot) => {
                slot.insert(order);
                Ok(())
            }
        }
    }

    pub fn get(&self, client_order_id: &ClientOrderId) -> Option<Order> {
        self.orders.lock().get(client_order_id).cloned()
    }

    pub fn contains(&self, client_order_id: &ClientOrderId) -> bool {
        self.orders.lock().contains_key(client_order_id)
    }

    pub fn remove(&self, client_order_id: &ClientOrderId) -> Option<Order> {
        self.orders.lock().remove(client_order_id)
    }

    /// Mutate one order in place. Returns `None` if the id is unknown.
    pub fn update<R>(
        &self,
        client_order_id: &ClientOrderId,
        f: impl FnOnce(&mut Order) -> R,
    ) -> Option<R> {
        self.orders.lock().get_mut(client_order_id).map(f)
    }

    /// Mutate one order, then drop it if it reached a terminal status.
    /// Returns the closure result and the removed order, if any.
    pub fn update_and_prune<R>(
        &self,
        client_order_id: &ClientOrderId,
        f: impl FnOnce(&mut Order) -> R,
    ) -> Option<(R, Option<Order>)> {
        let mut orders = self.orders.lock();
        let order = orders.get_mut(client_order_id)?;
        let out = f(order);
        let removed = if order.status.is_terminal() {
            orders.remove(client_order_id)
        } else {
            None
        };
        Some((out, removed))
    }

    pub fn len(&self) -> usize {
        self.orders.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.lock().is_empty()
    }

    /// Copies of all orders, optionally for one symbol, oldest first.
    pub fn snapshot(&self, symbol: Option<&str>) -> Vec<Order> {
        let mut out: Vec<Order> = self
            .orders
            .lock()
            .values()
            .filter(|o| symbol.map_or(true, |s| o.symbol == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.created_ms
                .cmp(&b.created_ms)
                .then_with(|| a.client_order_id.as_str().cmp(b.client_order_id.as_str()))
        });
        out
    }

    pub fn client_ids(&self, symbol: Option<&str>) -> Vec<ClientOrderId> {
        self.snapshot(symbol)
            .into_iter()
            .map(|o| o.client_order_id)
            .collect()
    }

    /// Distinct symbols with at least one order.
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .orders
            .lock()
            .values()
            .map(|o| o.symbol.clone())
            .collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }

    /// Resting orders on one side of one symbol.
    pub fn active_levels(&self, symbol: &str, side: OrderSide) -> usize {
        self.orders
            .lock()
            .values()
            .filter(|o| o.symbol == symbol && o.side == side)
            .count()
    }

    /// `sum(price * remaining)` on one side of one symbol.
    pub fn active_usd(&self, symbol: &str, side: OrderSide) -> Decimal {
        self.orders
            .lock()
            .values()
            .filter(|o| o.symbol == symbol && o.side == side)
            .map(|o| o.remaining_notional())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quoter_core::{OrderRequest, OrderStatus, Price, Size};
    use rust_decimal_macros::dec;

    fn order(cid: &str, symbol: &str, side: OrderSide, created_ms: u64) -> Order {
        let req = OrderRequest::limit(symbol, side, Size::new(dec!(2)), Price::new(dec!(100)));
        Order::new(ClientOrderId::from(cid), format!("o-{cid}"), &req, created_ms)
    }

    #[test]
    fn test_insert_replaces_same_id() {
        let table = OrderTable::new();
        assert!(table.insert(order("a", "BTCUSDT", OrderSide::Buy, 1)).is_none());
        assert!(table.insert(order("a", "BTCUSDT", OrderSide::Buy, 2)).is_some());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_insert_new_keeps_existing() {
        let table = OrderTable::new();
        assert!(table.insert_new(order("a", "BTCUSDT", OrderSide::Buy, 1)).is_ok());
        let rejected = table
            .insert_new(order("a", "ETHUSDT", OrderSide::Sell, 2))
            .unwrap_err();
        assert_eq!(rejected.symbol, "ETHUSDT");
        let kept = table.get(&ClientOrderId::from("a")).unwrap();
        assert_eq!((kept.symbol.as_str(), kept.created_ms), ("BTCUSDT", 1));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_exposure_queries() {
        let table = OrderTable::new();
        table.insert(order("a", "BTCUSDT", OrderSide::Buy, 1));
        table.insert(order("b", "BTCUSDT", OrderSide::Buy, 2));
        table.insert(order("c", "BTCUSDT", OrderSide::Sell, 3));
        table.insert(order("d", "ETHUSDT", OrderSide::Buy, 4));

        assert_eq!(table.active_levels("BTCUSDT", OrderSide::Buy), 2);
        assert_eq!(table.active_usd("BTCUSDT", OrderSide::Buy), dec!(400));
        assert_eq!(table.active_levels("ETHUSDT", OrderSide::Sell), 0);
        assert_eq!(table.symbols(), vec!["BTCUSDT", "ETHUSDT"]);
        assert_eq!(
            table.client_ids(Some("BTCUSDT")),
            vec![
                ClientOrderId::from("a"),
                ClientOrderId::from("b"),
                ClientOrderId::from("c")
            ]
        );
    }

    #[test]
    fn test_update_and_prune_removes_terminal() {
        let table = OrderTable::new();
        table.insert(order("a", "BTCUSDT", OrderSide::Buy, 1));

        let (changed, removed) = table
            .update_and_prune(&ClientOrderId::from("a"), |o| {
                o.set_status(OrderStatus::PartiallyFilled, 5)
            })
            .unwrap();
        assert!(changed);
        assert!(removed.is_none());

        let (_, removed) = table
            .update_and_prune(&ClientOrderId::from("a"), |o| o.mark_cancelled(6))
            .unwrap();
        assert_eq!(removed.unwrap().status, OrderStatus::Cancelled);
        assert!(table.is_empty());
        assert!(table
            .update(&ClientOrderId::from("a"), |o| o.mark_filled(7))
            .is_none());
    }
}
