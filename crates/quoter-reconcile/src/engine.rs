//! Reconciliation engine.
//!
//! Each cycle reads the venue's active orders and recent history, compares
//! them with the local table and repairs the table. The venue is
//! authoritative for status and quantities. Reconciliation never creates
//! local orders; it only marks, overwrites or closes.
//!
//! # Cycle
//!
//! 1. Fetch active orders and recent history (history failure → empty)
//! 2. `mismatch_ratio = |local - remote| / local`; above threshold → pause
//! 3. Local order missing remotely → history status, else Filled if it was
//!    working, else Cancelled
//! 4. Local order diverging from remote → overwrite from remote
//! 5. Remote active order unknown locally → best-effort cancel (orphan)
//! 6. No actions and paused by reconciliation → resume
//!
//! A failed active-orders fetch counts as a failed cycle and skips steps
//! 3 to 5: absence cannot be told apart from a failed read.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use quoter_core::{ClientOrderId, Order, OrderStatus};
use quoter_executor::{run_periodic, LoopConfig, LoopStats, OrderLifecycleManager};
use quoter_gateway::{CancelTarget, OrderSnapshot};
use quoter_risk::PauseReason;
use quoter_telemetry::Metrics;

use crate::config::ReconcileConfig;
use crate::error::{ReconcileError, ReconcileResult};

// ============================================================================
// Actions and results
// ============================================================================

/// One corrective step, in the order it was taken.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ReconcileAction {
    MarkFilled(ClientOrderId),
    MarkCancelled(ClientOrderId),
    /// Status or quantities taken from the venue.
    ReplaceFromRemote(ClientOrderId),
    CloseOrphan {
        symbol: String,
        order_id: String,
        client_order_id: ClientOrderId,
    },
    PauseQuoting,
    ResumeQuoting,
}

impl ReconcileAction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MarkFilled(_) => "mark_filled",
            Self::MarkCancelled(_) => "mark_cancelled",
            Self::ReplaceFromRemote(_) => "update_state",
            Self::CloseOrphan { .. } => "close_orphan",
            Self::PauseQuoting => "pause_quoting",
            Self::ResumeQuoting => "resume_quoting",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconciliationResult {
    pub mismatch_ratio: f64,
    pub local_count: usize,
    pub remote_count: usize,
    pub orders_fixed: usize,
    /// Orphans whose cancel the venue accepted.
    pub orphans_closed: usize,
    pub actions: Vec<ReconcileAction>,
    pub hard_desync: bool,
    pub risk_paused: bool,
    /// Set when the active-orders fetch failed.
    pub fetch_error: Option<String>,
    pub duration_ms: u64,
}

impl ReconciliationResult {
    pub fn is_clean(&self) -> bool {
        self.actions.is_empty() && self.fetch_error.is_none()
    }

    fn push(&mut self, action: ReconcileAction) {
        Metrics::reconcile_action(action.kind());
        self.actions.push(action);
    }
}

// ============================================================================
// ReconciliationEngine
// ============================================================================

pub struct ReconciliationEngine {
    config: ReconcileConfig,
    manager: Arc<OrderLifecycleManager>,
    consecutive_failures: AtomicU32,
    cycles: AtomicU64,
}

impl ReconciliationEngine {
    pub fn new(manager: Arc<OrderLifecycleManager>, config: ReconcileConfig) -> Self {
        Self {
            config,
            manager,
            consecutive_failures: AtomicU32::new(0),
            cycles: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Acquire)
    }

    async fn fetch_active(&self) -> ReconcileResult<Vec<OrderSnapshot>> {
        self.manager
            .gateway()
            .query_active(None)
            .await
            .map_err(|source| ReconcileError::Fetch {
                what: "active orders",
                source,
            })
    }

    async fn fetch_history(&self) -> ReconcileResult<Vec<OrderSnapshot>> {
        self.manager
            .gateway()
            .query_history(None, self.config.max_recent_history)
            .await
            .map_err(|source| ReconcileError::Fetch {
                what: "order history",
                source,
            })
    }

    /// Run one reconciliation cycle. Never fails; a failed fetch is
    /// reported in the result and counted toward the failure pause.
    pub async fn reconcile_once(&self) -> ReconciliationResult {
        let started = Instant::now();
        self.cycles.fetch_add(1, Ordering::AcqRel);
        let mut result = ReconciliationResult::default();

        // Orders created after this point may not be visible remotely yet.
        let local: Vec<Order> = self
            .manager
            .table()
            .snapshot(None)
            .into_iter()
            .filter(|o| o.status != OrderStatus::Replaced)
            .collect();

        let active = match self.fetch_active().await {
            Ok(orders) => Some(orders),
            Err(err) => {
                warn!("Reconciliation degraded: {err}");
                result.fetch_error = Some(err.to_string());
                None
            }
        };
        let history = match self.fetch_history().await {
            Ok(orders) => orders,
            Err(err) => {
                warn!("Reconciliation history unavailable: {err}");
                Vec::new()
            }
        };
        let remote = active.as_deref().unwrap_or_default();

        result.local_count = self.manager.table().len();
        result.remote_count = remote.len();
        result.mismatch_ratio = if result.local_count > 0 {
            result.local_count.abs_diff(result.remote_count) as f64 / result.local_count as f64
        } else {
            0.0
        };
        Metrics::reconcile_mismatch(result.mismatch_ratio);

        if result.mismatch_ratio > self.config.hard_desync_threshold {
            result.hard_desync = true;
            self.pause(PauseReason::HardDesync {
                mismatch_ratio: result.mismatch_ratio,
                local: result.local_count,
                remote: result.remote_count,
            });
            result.push(ReconcileAction::PauseQuoting);
        }

        if let Some(active) = active.as_deref() {
            self.repair_local(&local, active, &history, &mut result);
            self.close_orphans(&local, active, &mut result).await;
        }

        self.track_failures(&mut result);

        if result.actions.is_empty() && result.fetch_error.is_none() && self.paused_by_us() {
            if self.manager.pause().resume() {
                result.push(ReconcileAction::ResumeQuoting);
            }
        }

        if result.orders_fixed > 0 {
            self.manager.refresh_all_exposure();
        }
        result.risk_paused = self.manager.pause().is_paused();
        result.duration_ms = started.elapsed().as_millis() as u64;

        if result.actions.is_empty() {
            debug!(
                local = result.local_count,
                remote = result.remote_count,
                "Reconciliation clean"
            );
        } else {
            info!(
                local = result.local_count,
                remote = result.remote_count,
                mismatch_ratio = result.mismatch_ratio,
                orders_fixed = result.orders_fixed,
                orphans_closed = result.orphans_closed,
                actions = result.actions.len(),
                risk_paused = result.risk_paused,
                "Reconciliation completed"
            );
        }
        result
    }

    /// Steps 3 and 4.
    fn repair_local(
        &self,
        local: &[Order],
        active: &[OrderSnapshot],
        history: &[OrderSnapshot],
        result: &mut ReconciliationResult,
    ) {
        let active_by_cid = index_by_client_id(active);
        let active_by_oid: HashMap<&str, &OrderSnapshot> = active
            .iter()
            .filter(|o| !o.order_id.is_empty())
            .map(|o| (o.order_id.as_str(), o))
            .collect();
        let history_by_cid = index_by_client_id(history);
        let table = self.manager.table();
        let now = self.manager.clock().now_ms();

        for order in local {
            let cid = &order.client_order_id;
            let remote = active_by_cid
                .get(cid)
                .or_else(|| active_by_oid.get(order.order_id.as_str()));

            match remote {
                Some(remote) => {
                    if !order.diverges_from(remote.status, remote.filled_qty, remote.remaining_qty) {
                        continue;
                    }
                    let touched = table.update_and_prune(cid, |o| {
                        o.overwrite_from_remote(
                            remote.status,
                            remote.filled_qty,
                            remote.remaining_qty,
                            now,
                        )
                    });
                    if touched.is_some() {
                        debug!(cloid = %cid, status = %remote.status, "Local order overwritten from venue");
                        result.orders_fixed += 1;
                        result.push(ReconcileAction::ReplaceFromRemote(cid.clone()));
                    }
                }
                None => {
                    let closed = history_by_cid
                        .get(cid)
                        .filter(|h| h.status.is_terminal());
                    let (touched, status) = match closed {
                        Some(h) => (
                            table.update_and_prune(cid, |o| {
                                o.overwrite_from_remote(h.status, h.filled_qty, h.remaining_qty, now)
                            }),
                            h.status,
                        ),
                        None if order.status.is_working() => (
                            table.update_and_prune(cid, |o| o.mark_filled(now)),
                            OrderStatus::Filled,
                        ),
                        None => (
                            table.update_and_prune(cid, |o| o.mark_cancelled(now)),
                            OrderStatus::Cancelled,
                        ),
                    };
                    // Already closed by a push event or a cancel since the snapshot.
                    if touched.is_none() {
                        continue;
                    }
                    result.orders_fixed += 1;
                    let action = if status == OrderStatus::Filled {
                        ReconcileAction::MarkFilled(cid.clone())
                    } else {
                        ReconcileAction::MarkCancelled(cid.clone())
                    };
                    debug!(cloid = %cid, status = %status, "Order missing on venue, closed locally");
                    result.push(action);
                }
            }
        }
    }

    /// Step 5. Orders placed while the fetch was in flight are in the live
    /// table, so they are not mistaken for orphans.
    async fn close_orphans(
        &self,
        local: &[Order],
        active: &[OrderSnapshot],
        result: &mut ReconciliationResult,
    ) {
        let table = self.manager.table();
        let known_oids: HashSet<String> = local
            .iter()
            .chain(table.snapshot(None).iter())
            .map(|o| o.order_id.clone())
            .filter(|id| !id.is_empty())
            .collect();

        for remote in active {
            let cid = &remote.client_order_id;
            if (!cid.is_empty() && table.contains(cid)) || known_oids.contains(&remote.order_id) {
                continue;
            }
            if local.iter().any(|o| &o.client_order_id == cid && !cid.is_empty()) {
                continue;
            }

            result.push(ReconcileAction::CloseOrphan {
                symbol: remote.symbol.clone(),
                order_id: remote.order_id.clone(),
                client_order_id: cid.clone(),
            });
            let target = CancelTarget {
                symbol: remote.symbol.clone(),
                order_id: Some(remote.order_id.clone()).filter(|id| !id.is_empty()),
                client_order_id: Some(cid.clone()).filter(|id| !id.is_empty()),
            };
            match self.manager.gateway().cancel(target).await {
                Ok(()) => {
                    result.orphans_closed += 1;
                    info!(order_id = %remote.order_id, symbol = %remote.symbol, "Orphan order closed");
                }
                Err(err) => {
                    warn!(order_id = %remote.order_id, symbol = %remote.symbol, "Failed to close orphan: {err}");
                }
            }
        }
    }

    fn track_failures(&self, result: &mut ReconciliationResult) {
        if result.fetch_error.is_none() {
            self.consecutive_failures.store(0, Ordering::Release);
            return;
        }
        let count = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if count >= self.config.max_consecutive_failures {
            if self.pause(PauseReason::ConsecutiveFailures { count }) {
                result.push(ReconcileAction::PauseQuoting);
            }
        }
    }

    fn pause(&self, reason: PauseReason) -> bool {
        let now = self.manager.clock().now_ms();
        self.manager.pause().pause(reason, now)
    }

    /// Only pauses raised by reconciliation are lifted by it.
    fn paused_by_us(&self) -> bool {
        matches!(
            self.manager.pause().reason(),
            Some(PauseReason::HardDesync { .. } | PauseReason::ConsecutiveFailures { .. })
        )
    }

    /// Run cycles every `interval_ms` until `shutdown` is cancelled.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<LoopStats> {
        let interval = Duration::from_millis(self.config.interval_ms);
        let config = LoopConfig::new("reconcile", interval, interval);
        let clock = Arc::clone(self.manager.clock());
        tokio::spawn(async move {
            run_periodic(config, clock, shutdown, move || {
                let engine = Arc::clone(&self);
                async move {
                    let result = engine.reconcile_once().await;
                    match result.fetch_error {
                        Some(err) => Err(err),
                        None => Ok(()),
                    }
                }
            })
            .await
        })
    }
}

fn index_by_client_id(orders: &[OrderSnapshot]) -> HashMap<&ClientOrderId, &OrderSnapshot> {
    orders
        .iter()
        .filter(|o| !o.client_order_id.is_empty())
        .map(|o| (&o.client_order_id, o))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quoter_core::{ManualClock, OrderSide, OrderUpdateEvent, Price, Size};
    use quoter_executor::{Collaborators, LifecycleConfig, PlaceParams};
    use quoter_gateway::{GatewayCall, PaperGateway};
    use quoter_risk::{ThrottleConfig, ThrottleGuard};
    use rust_decimal_macros::dec;

    struct Harness {
        paper: Arc<PaperGateway>,
        manager: Arc<OrderLifecycleManager>,
        engine: ReconciliationEngine,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let paper = Arc::new(PaperGateway::with_clock(clock.clone()));
        let manager = Arc::new(
            OrderLifecycleManager::new(LifecycleConfig::default(), paper.clone(), clock)
                .with_collaborators(Collaborators {
                    throttle: Arc::new(ThrottleGuard::new(ThrottleConfig {
                        max_creates_per_sec: 1_000,
                        ..Default::default()
                    })),
                    ..Default::default()
                }),
        );
        let engine = ReconciliationEngine::new(Arc::clone(&manager), ReconcileConfig::default());
        Harness {
            paper,
            manager,
            engine,
        }
    }

    async fn place_n(manager: &OrderLifecycleManager, n: usize) -> Vec<ClientOrderId> {
        let mut ids = Vec::with_capacity(n);
        for _ in 0..n {
            let params =
                PlaceParams::limit("ETHUSDT", OrderSide::Buy, Size::new(dec!(1)), Price::new(dec!(2000)));
            ids.push(manager.place(params).await.unwrap());
        }
        ids
    }

    fn remote(cid: &str, order_id: &str, status: OrderStatus) -> OrderSnapshot {
        OrderSnapshot {
            order_id: order_id.into(),
            client_order_id: ClientOrderId::from(cid),
            symbol: "ETHUSDT".into(),
            side: OrderSide::Sell,
            price: Price::new(dec!(2100)),
            qty: Size::new(dec!(1)),
            filled_qty: Size::ZERO,
            remaining_qty: Size::new(dec!(1)),
            status,
            created_ms: 1,
            updated_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_clean_cycle_takes_no_action() {
        let h = harness();
        place_n(&h.manager, 3).await;
        let result = h.engine.reconcile_once().await;
        assert!(result.is_clean());
        assert_eq!(result.mismatch_ratio, 0.0);
        assert!(!result.risk_paused);
    }

    #[tokio::test]
    async fn test_missing_order_uses_history_status() {
        let h = harness();
        let ids = place_n(&h.manager, 10).await;
        // Venue cancelled one order; it shows up in history.
        h.manager
            .gateway()
            .cancel(CancelTarget::by_client_id("ETHUSDT", ids[0].clone()))
            .await
            .unwrap();

        let result = h.engine.reconcile_once().await;
        assert_eq!(result.actions, vec![ReconcileAction::MarkCancelled(ids[0].clone())]);
        assert!(h.manager.get_order(&ids[0]).is_none());
        assert_eq!(result.orders_fixed, 1);
    }

    #[tokio::test]
    async fn test_order_closed_during_fetch_is_not_counted() {
        let h = harness();
        let ids = place_n(&h.manager, 20).await;
        let now = h.manager.clock().now_ms();
        assert!(h.manager.pause().pause(
            PauseReason::HardDesync {
                mismatch_ratio: 0.5,
                local: 20,
                remote: 10,
            },
            now,
        ));
        h.paper.set_latency(Duration::from_millis(50));

        // Filled and pushed while the active query is in flight.
        let fill = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert!(h.paper.fill(&ids[0]));
            assert!(h.manager.handle_order_update(&OrderUpdateEvent {
                client_order_id: ids[0].clone(),
                order_id: None,
                status: Some(OrderStatus::Filled),
                cum_filled_qty: Some(Size::new(dec!(1))),
            }));
        };
        let (result, ()) = tokio::join!(h.engine.reconcile_once(), fill);

        assert_eq!(result.local_count, 19);
        assert_eq!(result.remote_count, 19);
        assert_eq!(result.orders_fixed, 0);
        assert_eq!(result.actions, vec![ReconcileAction::ResumeQuoting]);
        assert!(!result.risk_paused);
    }

    #[tokio::test]
    async fn test_divergent_order_overwritten_from_venue() {
        let h = harness();
        let ids = place_n(&h.manager, 1).await;
        let mut snapshot = h.paper.active_order(&ids[0]).unwrap();
        snapshot.status = OrderStatus::PartiallyFilled;
        snapshot.filled_qty = Size::new(dec!(0.4));
        snapshot.remaining_qty = Size::new(dec!(0.6));
        h.paper.insert_remote(snapshot);

        let result = h.engine.reconcile_once().await;
        assert_eq!(result.actions, vec![ReconcileAction::ReplaceFromRemote(ids[0].clone())]);
        let order = h.manager.get_order(&ids[0]).unwrap();
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.remaining_qty(), Size::new(dec!(0.6)));
    }

    #[tokio::test]
    async fn test_orphan_is_cancelled_and_not_adopted() {
        let h = harness();
        place_n(&h.manager, 10).await;
        h.paper.insert_remote(remote("stranger", "X9", OrderStatus::New));

        let result = h.engine.reconcile_once().await;
        assert_eq!(result.orphans_closed, 1);
        assert!(matches!(result.actions[0], ReconcileAction::CloseOrphan { .. }));
        assert!(h.manager.get_order(&ClientOrderId::from("stranger")).is_none());
        assert!(h.paper.active_order(&ClientOrderId::from("stranger")).is_none());
    }

    #[tokio::test]
    async fn test_failed_orphan_cancel_is_logged_only() {
        let h = harness();
        place_n(&h.manager, 10).await;
        h.paper.insert_remote(remote("stranger", "X9", OrderStatus::New));
        h.paper.fail_cancels_for(ClientOrderId::from("stranger"));

        let result = h.engine.reconcile_once().await;
        assert_eq!(result.orphans_closed, 0);
        assert_eq!(result.actions.len(), 1);
    }

    #[tokio::test]
    async fn test_active_fetch_failure_skips_repairs_and_pauses_after_threshold() {
        let h = harness();
        let ids = place_n(&h.manager, 2).await;
        h.paper.set_active_query_failure(true);

        for cycle in 1..=3u32 {
            let result = h.engine.reconcile_once().await;
            assert!(result.fetch_error.is_some());
            assert_eq!(h.engine.consecutive_failures(), cycle);
            assert!(result.hard_desync);
        }
        // Local orders survive a failed read.
        assert!(h.manager.get_order(&ids[0]).is_some());
        assert!(h.manager.is_risk_paused());
        assert_eq!(
            h.paper.count_calls(|c| matches!(c, GatewayCall::Cancel(_))),
            0
        );

        h.paper.set_active_query_failure(false);
        let result = h.engine.reconcile_once().await;
        assert_eq!(h.engine.consecutive_failures(), 0);
        assert_eq!(result.actions, vec![ReconcileAction::ResumeQuoting]);
        assert!(!result.risk_paused);
    }

    #[tokio::test]
    async fn test_history_failure_degrades_to_empty() {
        let h = harness();
        place_n(&h.manager, 2).await;
        h.paper.set_history_query_failure(true);
        let result = h.engine.reconcile_once().await;
        assert!(result.fetch_error.is_none());
        assert!(result.is_clean());
    }

    #[tokio::test]
    async fn test_manual_pause_is_not_lifted() {
        let h = harness();
        h.manager.pause().pause(
            PauseReason::Manual {
                message: "operator".into(),
            },
            1,
        );
        let result = h.engine.reconcile_once().await;
        assert!(result.actions.is_empty());
        assert!(result.risk_paused);
    }
}
