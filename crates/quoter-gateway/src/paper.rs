//! In-memory venue.
//!
//! `PaperGateway` implements the full gateway contract against a local
//! order book of resting orders: places are acknowledged, cancels and
//! amends act on the resting set, closed orders move to a bounded history.
//! It backs paper trading in the binary and doubles as the recording test
//! venue, with scripted failures per call kind.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use quoter_core::{ClientOrderId, OrderStatus, Price, SharedClock, Size, SystemClock};

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{BoxFuture, OrderGateway};
use crate::types::{AmendRequest, BatchOutcome, CancelTarget, OrderSnapshot, PlaceAck, PlaceRequest};

const HISTORY_CAPACITY: usize = 500;

/// One recorded gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Place(ClientOrderId),
    Cancel(CancelTarget),
    Amend(AmendRequest),
    BatchPlace { symbol: String, count: usize },
    BatchCancel { symbol: String, count: usize },
    QueryActive(Option<String>),
    QueryHistory(Option<String>, usize),
}

#[derive(Debug, Default)]
struct Book {
    /// Resting orders by client id.
    active: HashMap<ClientOrderId, OrderSnapshot>,
    /// Closed orders, newest at the front.
    history: VecDeque<OrderSnapshot>,
}

impl Book {
    fn find_key(&self, order_id: Option<&str>, client_id: Option<&ClientOrderId>) -> Option<ClientOrderId> {
        if let Some(cid) = client_id.filter(|c| !c.is_empty()) {
            if self.active.contains_key(cid) {
                return Some(cid.clone());
            }
        }
        let order_id = order_id.filter(|o| !o.is_empty())?;
        self.active
            .values()
            .find(|o| o.order_id == order_id)
            .map(|o| o.client_order_id.clone())
    }

    fn close(&mut self, key: &ClientOrderId, status: OrderStatus, now_ms: u64) -> Option<OrderSnapshot> {
        let mut order = self.active.remove(key)?;
        order.status = status;
        order.updated_ms = now_ms;
        self.history.push_front(order.clone());
        self.history.truncate(HISTORY_CAPACITY);
        Some(order)
    }
}

/// In-memory venue with call recording and failure scripting.
pub struct PaperGateway {
    clock: SharedClock,
    book: Mutex<Book>,
    next_order_id: AtomicU64,
    calls: Mutex<Vec<GatewayCall>>,
    /// Errors returned by the next places, in order.
    place_errors: Mutex<VecDeque<GatewayError>>,
    /// Client ids whose cancels fail.
    failing_cancels: Mutex<HashSet<ClientOrderId>>,
    fail_next_amend: AtomicBool,
    /// Client id echoed in the next place ack instead of the request's.
    echo_override: Mutex<Option<ClientOrderId>>,
    fail_active_query: AtomicBool,
    fail_history_query: AtomicBool,
    ready: AtomicBool,
    /// Delay before every call takes effect on the book.
    latency_ms: AtomicU64,
    mids: DashMap<String, Price>,
}

impl Default for PaperGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperGateway {
    pub fn new() -> Self {
        Self::with_clock(SystemClock::shared())
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            clock,
            book: Mutex::new(Book::default()),
            next_order_id: AtomicU64::new(1),
            calls: Mutex::new(Vec::new()),
            place_errors: Mutex::new(VecDeque::new()),
            failing_cancels: Mutex::new(HashSet::new()),
            fail_next_amend: AtomicBool::new(false),
            echo_override: Mutex::new(None),
            fail_active_query: AtomicBool::new(false),
            fail_history_query: AtomicBool::new(false),
            ready: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
            mids: DashMap::new(),
        }
    }

    // ------------------------------------------------------------------
    // Scripting
    // ------------------------------------------------------------------

    /// Queue errors for the next place calls.
    pub fn push_place_errors(&self, errors: Vec<GatewayError>) {
        self.place_errors.lock().extend(errors);
    }

    /// Make every cancel of `client_order_id` fail.
    pub fn fail_cancels_for(&self, client_order_id: ClientOrderId) {
        self.failing_cancels.lock().insert(client_order_id);
    }

    pub fn clear_cancel_failures(&self) {
        self.failing_cancels.lock().clear();
    }

    /// The next amend is rejected.
    pub fn fail_next_amend(&self) {
        self.fail_next_amend.store(true, Ordering::SeqCst);
    }

    /// The next acknowledged place echoes `client_order_id`.
    pub fn echo_next_place_as(&self, client_order_id: ClientOrderId) {
        *self.echo_override.lock() = Some(client_order_id);
    }

    pub fn set_active_query_failure(&self, fail: bool) {
        self.fail_active_query.store(fail, Ordering::SeqCst);
    }

    pub fn set_history_query_failure(&self, fail: bool) {
        self.fail_history_query.store(fail, Ordering::SeqCst);
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Delay every call by `latency` before it reaches the book.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_mid(&self, symbol: impl Into<String>, mid: Price) {
        self.mids.insert(symbol.into(), mid);
    }

    pub fn mid(&self, symbol: &str) -> Option<Price> {
        self.mids.get(symbol).map(|p| *p)
    }

    // ------------------------------------------------------------------
    // Venue-side events
    // ------------------------------------------------------------------

    /// Put an order on the book that we never placed (an orphan).
    pub fn insert_remote(&self, snapshot: OrderSnapshot) {
        self.book
            .lock()
            .active
            .insert(snapshot.client_order_id.clone(), snapshot);
    }

    /// Fill a resting order completely and move it to history.
    pub fn fill(&self, client_order_id: &ClientOrderId) -> bool {
        let now = self.clock.now_ms();
        let mut book = self.book.lock();
        if let Some(order) = book.active.get_mut(client_order_id) {
            order.filled_qty = order.qty;
            order.remaining_qty = Size::ZERO;
        }
        book.close(client_order_id, OrderStatus::Filled, now).is_some()
    }

    /// Drop a resting order without a trace, as if the venue lost it.
    pub fn forget(&self, client_order_id: &ClientOrderId) -> bool {
        self.book.lock().active.remove(client_order_id).is_some()
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().clone()
    }

    pub fn count_calls(&self, pred: impl Fn(&GatewayCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn active_count(&self) -> usize {
        self.book.lock().active.len()
    }

    pub fn active_order(&self, client_order_id: &ClientOrderId) -> Option<OrderSnapshot> {
        self.book.lock().active.get(client_order_id).cloned()
    }

    // ------------------------------------------------------------------
    // Venue logic
    // ------------------------------------------------------------------

    fn record(&self, call: GatewayCall) {
        self.calls.lock().push(call);
    }

    async fn delay(&self) {
        let ms = self.latency_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    fn do_place(&self, request: PlaceRequest) -> GatewayResult<PlaceAck> {
        if let Some(err) = self.place_errors.lock().pop_front() {
            return Err(err);
        }
        if request.client_order_id.is_empty() {
            return Err(GatewayError::invalid_params("missing client order id"));
        }
        if !request.order.qty.is_positive() {
            return Err(GatewayError::invalid_params("qty must be positive"));
        }

        let now = self.clock.now_ms();
        let mut book = self.book.lock();
        if book.active.contains_key(&request.client_order_id) {
            return Err(GatewayError::invalid_params(format!(
                "duplicate client order id {}",
                request.client_order_id
            )));
        }

        let order_id = format!("P{}", self.next_order_id.fetch_add(1, Ordering::AcqRel));
        let snapshot = OrderSnapshot {
            order_id: order_id.clone(),
            client_order_id: request.client_order_id.clone(),
            symbol: request.order.symbol.clone(),
            side: request.order.side,
            price: request.order.price.unwrap_or_default(),
            qty: request.order.qty,
            filled_qty: Size::ZERO,
            remaining_qty: request.order.qty,
            status: OrderStatus::New,
            created_ms: now,
            updated_ms: now,
        };
        book.active.insert(request.client_order_id.clone(), snapshot);
        debug!(cloid = %request.client_order_id, order_id = %order_id, "Paper order accepted");

        let client_order_id = self
            .echo_override
            .lock()
            .take()
            .unwrap_or(request.client_order_id);
        Ok(PlaceAck {
            order_id,
            client_order_id,
        })
    }

    fn do_cancel(&self, target: &CancelTarget) -> GatewayResult<()> {
        if !target.has_id() {
            return Err(GatewayError::invalid_params("cancel needs an order id"));
        }
        if let Some(cid) = &target.client_order_id {
            if self.failing_cancels.lock().contains(cid) {
                return Err(GatewayError::rejected(format!("cancel rejected for {cid}")));
            }
        }

        let now = self.clock.now_ms();
        let mut book = self.book.lock();
        let key = book
            .find_key(target.order_id.as_deref(), target.client_order_id.as_ref())
            .ok_or_else(|| GatewayError::not_found("order not exists or too late to cancel"))?;
        book.close(&key, OrderStatus::Cancelled, now);
        Ok(())
    }

    fn do_amend(&self, request: &AmendRequest) -> GatewayResult<()> {
        if self.fail_next_amend.swap(false, Ordering::SeqCst) {
            return Err(GatewayError::rejected("amend rejected"));
        }

        let now = self.clock.now_ms();
        let mut book = self.book.lock();
        let key = book
            .find_key(request.order_id.as_deref(), request.client_order_id.as_ref())
            .ok_or_else(|| GatewayError::not_found("order not exists"))?;
        let order = book
            .active
            .get_mut(&key)
            .ok_or_else(|| GatewayError::not_found("order not exists"))?;

        if let Some(price) = request.price {
            order.price = price;
        }
        if let Some(qty) = request.qty {
            if qty < order.filled_qty {
                return Err(GatewayError::invalid_params("qty below filled"));
            }
            order.qty = qty;
            order.remaining_qty = qty.saturating_sub(order.filled_qty);
        }
        order.updated_ms = now;
        Ok(())
    }

    fn matches_symbol(order: &OrderSnapshot, symbol: Option<&str>) -> bool {
        symbol.map_or(true, |s| order.symbol == s)
    }
}

impl OrderGateway for PaperGateway {
    fn place(&self, request: PlaceRequest) -> BoxFuture<'_, GatewayResult<PlaceAck>> {
        Box::pin(async move {
            self.record(GatewayCall::Place(request.client_order_id.clone()));
            self.delay().await;
            self.do_place(request)
        })
    }

    fn cancel(&self, target: CancelTarget) -> BoxFuture<'_, GatewayResult<()>> {
        Box::pin(async move {
            self.record(GatewayCall::Cancel(target.clone()));
            self.delay().await;
            self.do_cancel(&target)
        })
    }

    fn amend(&self, request: AmendRequest) -> BoxFuture<'_, GatewayResult<()>> {
        Box::pin(async move {
            self.record(GatewayCall::Amend(request.clone()));
            self.delay().await;
            self.do_amend(&request)
        })
    }

    fn query_active(
        &self,
        symbol: Option<String>,
    ) -> BoxFuture<'_, GatewayResult<Vec<OrderSnapshot>>> {
        Box::pin(async move {
            self.record(GatewayCall::QueryActive(symbol.clone()));
            self.delay().await;
            if self.fail_active_query.load(Ordering::SeqCst) {
                return Err(GatewayError::timeout("active orders query timed out"));
            }
            let book = self.book.lock();
            let mut orders: Vec<OrderSnapshot> = book
                .active
                .values()
                .filter(|o| Self::matches_symbol(o, symbol.as_deref()))
                .cloned()
                .collect();
            orders.sort_by(|a, b| a.client_order_id.cmp(&b.client_order_id));
            Ok(orders)
        })
    }

    fn query_history(
        &self,
        symbol: Option<String>,
        limit: usize,
    ) -> BoxFuture<'_, GatewayResult<Vec<OrderSnapshot>>> {
        Box::pin(async move {
            self.record(GatewayCall::QueryHistory(symbol.clone(), limit));
            self.delay().await;
            if self.fail_history_query.load(Ordering::SeqCst) {
                return Err(GatewayError::timeout("history query timed out"));
            }
            let book = self.book.lock();
            Ok(book
                .history
                .iter()
                .filter(|o| Self::matches_symbol(o, symbol.as_deref()))
                .take(limit)
                .cloned()
                .collect())
        })
    }

    fn batch_place(
        &self,
        symbol: String,
        requests: Vec<PlaceRequest>,
    ) -> BoxFuture<'_, BatchOutcome<PlaceAck>> {
        Box::pin(async move {
            self.record(GatewayCall::BatchPlace {
                symbol,
                count: requests.len(),
            });
            self.delay().await;
            BatchOutcome::new(requests.into_iter().map(|r| self.do_place(r)).collect())
        })
    }

    fn batch_cancel(
        &self,
        symbol: String,
        targets: Vec<CancelTarget>,
    ) -> BoxFuture<'_, BatchOutcome<()>> {
        Box::pin(async move {
            self.record(GatewayCall::BatchCancel {
                symbol,
                count: targets.len(),
            });
            self.delay().await;
            BatchOutcome::new(targets.iter().map(|t| self.do_cancel(t)).collect())
        })
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quoter_core::{OrderRequest, OrderSide};
    use rust_decimal_macros::dec;

    fn request(id: &str) -> PlaceRequest {
        PlaceRequest {
            client_order_id: ClientOrderId::from(id),
            order: OrderRequest::limit(
                "BTCUSDT",
                OrderSide::Sell,
                Size::new(dec!(0.5)),
                Price::new(dec!(50100)),
            ),
        }
    }

    #[tokio::test]
    async fn test_place_cancel_moves_to_history() {
        let paper = PaperGateway::new();
        let ack = paper.place(request("c1")).await.unwrap();
        assert_eq!(ack.order_id, "P1");
        assert_eq!(paper.active_count(), 1);

        paper
            .cancel(CancelTarget::by_order_id("BTCUSDT", "P1"))
            .await
            .unwrap();
        assert_eq!(paper.active_count(), 0);

        let history = paper.query_history(None, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_duplicate_client_id_rejected() {
        let paper = PaperGateway::new();
        paper.place(request("c1")).await.unwrap();
        let err = paper.place(request("c1")).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_amend_updates_resting_order() {
        let paper = PaperGateway::new();
        paper.place(request("c1")).await.unwrap();
        paper
            .amend(AmendRequest {
                symbol: "BTCUSDT".into(),
                order_id: None,
                client_order_id: Some(ClientOrderId::from("c1")),
                price: Some(Price::new(dec!(50200))),
                qty: Some(Size::new(dec!(0.4))),
            })
            .await
            .unwrap();

        let order = paper.active_order(&ClientOrderId::from("c1")).unwrap();
        assert_eq!(order.price.0, dec!(50200));
        assert_eq!(order.remaining_qty.0, dec!(0.4));
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let paper = PaperGateway::new();
        paper.place(request("c1")).await.unwrap();
        paper.fail_cancels_for(ClientOrderId::from("c1"));
        paper.fail_next_amend();

        assert!(paper
            .cancel(CancelTarget::by_client_id("BTCUSDT", ClientOrderId::from("c1")))
            .await
            .is_err());
        assert!(paper
            .amend(AmendRequest {
                symbol: "BTCUSDT".into(),
                order_id: None,
                client_order_id: Some(ClientOrderId::from("c1")),
                price: None,
                qty: None,
            })
            .await
            .is_err());

        paper.set_active_query_failure(true);
        assert!(paper.query_active(None).await.is_err());
    }

    #[tokio::test]
    async fn test_batch_records_single_call() {
        let paper = PaperGateway::new();
        let outcome = paper
            .batch_place(
                "BTCUSDT".into(),
                vec![request("a"), request("b"), request("a")],
            )
            .await;
        assert_eq!(outcome.success_count(), 2);
        assert_eq!(outcome.failed_count(), 1);
        assert_eq!(
            paper.count_calls(|c| matches!(c, GatewayCall::BatchPlace { count: 3, .. })),
            1
        );
        assert_eq!(paper.count_calls(|c| matches!(c, GatewayCall::Place(_))), 0);
    }

    #[tokio::test]
    async fn test_fill_moves_to_history_as_filled() {
        let paper = PaperGateway::new();
        paper.place(request("c1")).await.unwrap();
        assert!(paper.fill(&ClientOrderId::from("c1")));
        let history = paper.query_history(Some("BTCUSDT".into()), 5).await.unwrap();
        assert_eq!(history[0].status, OrderStatus::Filled);
        assert!(history[0].remaining_qty.is_zero());
    }
}
