//! Order lifecycle manager.
//!
//! Owns the active order table and every path that mutates it: place,
//! amend-first update, cancel, the anti-stale sweep, remote sync and the
//! venue's push events.
//!
//! # Admission order (strict)
//!
//! 1. Throttle              → `AdmissionError::Throttled`
//! 2. Manual/auto pause     → `AdmissionError::Paused`
//! 3. Scheduler             → `SchedulerClosed` / `SchedulerCooldown`
//! 4. Portfolio level cap   → `LevelCapReached`
//!    4b. Portfolio budget  → `BudgetExhausted` / `NonPositiveQty` (qty shrinks)
//! 5. Circuit breaker       → `CircuitOpen`
//!
//! Every gate runs before any network call. The table lock is never held
//! across an `.await`.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use quoter_core::{
    ClientOrderId, Cohort, ExecutionEvent, IdAllocator, InstrumentRegistry, InstrumentSpec,
    MarketSnapshot, Order, OrderRequest, OrderSide, OrderStatus, OrderType, OrderUpdateEvent,
    PortfolioTargets, Price, SharedClock, Size, TimeInForce,
};
use quoter_gateway::{
    AmendRequest, CancelTarget, DynGateway, GatewayError, OrderSnapshot, PlaceAck, PlaceRequest,
};
use quoter_risk::{
    ActionKind, CircuitBreaker, GuardConfig, QuotingPause, RuntimeGuard, SchedulerDecision,
    SchedulerSet, ThrottleConfig, ThrottleGuard,
};
use quoter_telemetry::Metrics;

use crate::amend::{self, AmendPolicy};
use crate::command_bus::{BatchCommand, Command, CommandBus};
use crate::config::{EffectiveOverrides, LifecycleConfig};
use crate::error::{AdmissionError, OrderError, OrderResult};
use crate::mid_cache::MidPriceCache;
use crate::order_table::OrderTable;
use crate::rollout::{CohortConfigs, RolloutConfig};
use crate::routing::CohortRouter;
use crate::stale::{self, StaleAction, StaleOutcome, StaleReason, StaleSweepSummary};

// ============================================================================
// Inputs and outputs
// ============================================================================

/// Admission collaborators, fixed at construction.
pub struct Collaborators {
    pub throttle: Arc<ThrottleGuard>,
    pub guard: Arc<RuntimeGuard>,
    pub scheduler: Arc<SchedulerSet>,
    /// None disables the circuit gate.
    pub circuit: Option<Arc<CircuitBreaker>>,
    /// Sticky pause raised by reconciliation.
    pub pause: Arc<QuotingPause>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            throttle: Arc::new(ThrottleGuard::new(ThrottleConfig::default())),
            guard: Arc::new(RuntimeGuard::new(GuardConfig::default())),
            scheduler: Arc::new(SchedulerSet::default()),
            circuit: None,
            pause: Arc::new(QuotingPause::new()),
        }
    }
}

/// A new order as requested by a strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceParams {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub qty: Size,
    pub price: Option<Price>,
    pub time_in_force: TimeInForce,
    /// Caller-chosen id; allocated when absent.
    pub client_order_id: Option<ClientOrderId>,
}

impl PlaceParams {
    pub fn limit(symbol: impl Into<String>, side: OrderSide, qty: Size, price: Price) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            qty,
            price: Some(price),
            time_in_force: TimeInForce::GoodTilCancelled,
            client_order_id: None,
        }
    }

    pub fn market(symbol: impl Into<String>, side: OrderSide, qty: Size) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            qty,
            price: None,
            time_in_force: TimeInForce::ImmediateOrCancel,
            client_order_id: None,
        }
    }

    #[must_use]
    pub fn with_client_id(mut self, client_order_id: impl Into<ClientOrderId>) -> Self {
        self.client_order_id = Some(client_order_id.into());
        self
    }

    #[must_use]
    pub fn with_tif(mut self, time_in_force: TimeInForce) -> Self {
        self.time_in_force = time_in_force;
        self
    }
}

/// How an update was carried out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Modified in place; the id is unchanged.
    Amended(ClientOrderId),
    /// Cancelled and placed again under a new id.
    Replaced {
        old: ClientOrderId,
        new: ClientOrderId,
    },
}

impl UpdateOutcome {
    /// Id of the order now resting.
    pub fn client_order_id(&self) -> &ClientOrderId {
        match self {
            Self::Amended(id) => id,
            Self::Replaced { new, .. } => new,
        }
    }

    pub fn is_amended(&self) -> bool {
        matches!(self, Self::Amended(_))
    }
}

/// Item counts of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub batches: usize,
    pub success: usize,
    pub failed: usize,
}

impl FlushReport {
    pub fn merge(&mut self, other: FlushReport) {
        self.batches += other.batches;
        self.success += other.success;
        self.failed += other.failed;
    }
}

/// On-disk form of the active table.
#[derive(Debug, Serialize, Deserialize)]
struct TableSnapshot {
    saved_ms: u64,
    orders: Vec<Order>,
}

/// Puts a `Replaced` order back to its prior status unless disarmed.
struct ReplaceGuard<'a> {
    manager: &'a OrderLifecycleManager,
    client_order_id: ClientOrderId,
    prior: OrderStatus,
    armed: bool,
}

impl ReplaceGuard<'_> {
    fn restore(&mut self) {
        self.armed = false;
        let prior = self.prior;
        let now = self.manager.clock.now_ms();
        self.manager.table.update(&self.client_order_id, |o| {
            if o.status == OrderStatus::Replaced {
                o.set_status(prior, now);
            }
        });
    }
}

impl Drop for ReplaceGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(cloid = %self.client_order_id, prior = %self.prior, "Replace interrupted, status restored");
            self.restore();
        }
    }
}

// ============================================================================
// OrderLifecycleManager
// ============================================================================

pub struct OrderLifecycleManager {
    config: LifecycleConfig,
    /// Base config patched per cohort.
    cohorts: CohortConfigs,
    router: CohortRouter,
    overrides: RwLock<EffectiveOverrides>,
    gateway: DynGateway,
    clock: SharedClock,
    ids: IdAllocator,
    table: Arc<OrderTable>,
    bus: Arc<CommandBus>,
    mids: Arc<MidPriceCache>,
    instruments: Arc<InstrumentRegistry>,
    targets: Arc<PortfolioTargets>,
    risk: Collaborators,
    shadow: AtomicBool,
    /// Venue error rate as f64 bits, fed to the adaptive backoff.
    error_rate_bits: AtomicU64,
    ws_lag_ms: AtomicU64,
}

impl OrderLifecycleManager {
    #[must_use]
    pub fn new(config: LifecycleConfig, gateway: DynGateway, clock: SharedClock) -> Self {
        let fallback = InstrumentSpec::new(config.default_tick_size, config.default_lot_size);
        Self {
            cohorts: RolloutConfig::default().resolve(&config),
            router: CohortRouter::default(),
            overrides: RwLock::new(EffectiveOverrides::default()),
            gateway,
            ids: IdAllocator::new(Arc::clone(&clock)),
            clock,
            table: Arc::new(OrderTable::new()),
            bus: Arc::new(CommandBus::default()),
            mids: Arc::new(MidPriceCache::new()),
            instruments: Arc::new(InstrumentRegistry::new(fallback)),
            targets: Arc::new(PortfolioTargets::default()),
            risk: Collaborators::default(),
            shadow: AtomicBool::new(config.shadow),
            error_rate_bits: AtomicU64::new(0f64.to_bits()),
            ws_lag_ms: AtomicU64::new(0),
            config,
        }
    }

    #[must_use]
    pub fn with_collaborators(mut self, risk: Collaborators) -> Self {
        self.risk = risk;
        self
    }

    /// Route orders to blue/green and patch each cohort's config.
    #[must_use]
    pub fn with_rollout(mut self, rollout: &RolloutConfig) -> Self {
        self.cohorts = rollout.resolve(&self.config);
        self.router = CohortRouter::from_rollout(rollout);
        self
    }

    #[must_use]
    pub fn with_instruments(mut self, instruments: Arc<InstrumentRegistry>) -> Self {
        self.instruments = instruments;
        self
    }

    #[must_use]
    pub fn with_targets(mut self, targets: Arc<PortfolioTargets>) -> Self {
        self.targets = targets;
        self
    }

    #[must_use]
    pub fn with_mid_cache(mut self, mids: Arc<MidPriceCache>) -> Self {
        self.mids = mids;
        self
    }

    #[must_use]
    pub fn with_bus(mut self, bus: Arc<CommandBus>) -> Self {
        self.bus = bus;
        self
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn gateway(&self) -> &DynGateway {
        &self.gateway
    }

    pub fn table(&self) -> &Arc<OrderTable> {
        &self.table
    }

    pub fn bus(&self) -> &Arc<CommandBus> {
        &self.bus
    }

    pub fn mids(&self) -> &Arc<MidPriceCache> {
        &self.mids
    }

    pub fn instruments(&self) -> &Arc<InstrumentRegistry> {
        &self.instruments
    }

    pub fn targets(&self) -> &Arc<PortfolioTargets> {
        &self.targets
    }

    pub fn pause(&self) -> &Arc<QuotingPause> {
        &self.risk.pause
    }

    pub fn guard(&self) -> &Arc<RuntimeGuard> {
        &self.risk.guard
    }

    pub fn set_overrides(&self, overrides: EffectiveOverrides) {
        info!(?overrides, "Effective overrides updated");
        *self.overrides.write() = overrides;
    }

    pub fn overrides(&self) -> EffectiveOverrides {
        self.overrides.read().clone()
    }

    pub fn set_shadow(&self, shadow: bool) {
        self.shadow.store(shadow, Ordering::SeqCst);
    }

    pub fn is_shadow(&self) -> bool {
        self.shadow.load(Ordering::SeqCst)
    }

    /// Feed health signals for the adaptive place backoff.
    pub fn report_health(&self, error_rate: f64, ws_lag_ms: u64) {
        self.error_rate_bits
            .store(error_rate.to_bits(), Ordering::Relaxed);
        self.ws_lag_ms.store(ws_lag_ms, Ordering::Relaxed);
    }

    pub fn on_market_snapshot(&self, snapshot: &MarketSnapshot) {
        self.mids.update_from_snapshot(snapshot);
    }

    pub fn get_order(&self, client_order_id: &ClientOrderId) -> Option<Order> {
        self.table.get(client_order_id)
    }

    pub fn active_orders(&self, symbol: Option<&str>) -> Vec<Order> {
        self.table.snapshot(symbol)
    }

    pub fn active_levels(&self, symbol: &str, side: OrderSide) -> usize {
        self.table.active_levels(symbol, side)
    }

    pub fn active_usd(&self, symbol: &str, side: OrderSide) -> Decimal {
        self.table.active_usd(symbol, side)
    }

    /// Whether any pause currently blocks new orders.
    pub fn is_risk_paused(&self) -> bool {
        self.risk.pause.is_paused() || self.risk.guard.is_paused()
    }

    pub fn risk_pause_reason(&self) -> Option<String> {
        if let Some(reason) = self.risk.pause.reason() {
            return Some(reason.to_string());
        }
        if self.risk.guard.is_paused() {
            return Some(
                self.risk
                    .guard
                    .reason()
                    .unwrap_or_else(|| "runtime guard".to_string()),
            );
        }
        None
    }

    /// Recompute the exposure gauges of one symbol from the table.
    pub fn refresh_exposure(&self, symbol: &str) {
        for side in [OrderSide::Buy, OrderSide::Sell] {
            let levels = self.table.active_levels(symbol, side);
            let usd = self.table.active_usd(symbol, side).to_f64().unwrap_or(0.0);
            Metrics::active_exposure(symbol, side.as_str(), levels, usd);
        }
    }

    pub fn refresh_all_exposure(&self) {
        let mut symbols = self.table.symbols();
        symbols.extend(self.targets.symbols());
        symbols.sort();
        symbols.dedup();
        for symbol in symbols {
            self.refresh_exposure(&symbol);
        }
    }

    // ------------------------------------------------------------------
    // Admission
    // ------------------------------------------------------------------

    /// Round and validate a request.
    fn prepare(&self, params: &PlaceParams) -> OrderResult<(OrderRequest, InstrumentSpec)> {
        if params.symbol.is_empty() {
            return Err(OrderError::InvalidRequest("symbol is empty".into()));
        }
        let spec = self.instruments.get(&params.symbol);
        let qty = spec.round_qty(params.qty);
        if !qty.is_positive() {
            return Err(OrderError::InvalidRequest(format!(
                "qty {} rounds to zero",
                params.qty
            )));
        }
        if qty < spec.min_qty {
            return Err(OrderError::InvalidRequest(format!(
                "qty {qty} below minimum {}",
                spec.min_qty
            )));
        }
        let price = match (params.order_type, params.price) {
            (_, Some(price)) => {
                let rounded = spec.round_price(price);
                if !rounded.is_positive() {
                    return Err(OrderError::InvalidRequest(format!(
                        "price {price} rounds to zero"
                    )));
                }
                Some(rounded)
            }
            (OrderType::Limit, None) => {
                return Err(OrderError::InvalidRequest("limit order needs a price".into()));
            }
            (OrderType::Market, None) => None,
        };
        let request = OrderRequest {
            symbol: params.symbol.clone(),
            side: params.side,
            order_type: params.order_type,
            qty,
            price,
            time_in_force: params.time_in_force,
        };
        Ok((request, spec))
    }

    /// Run every gate in order. Returns the admitted, possibly shrunk, qty.
    fn admit(
        &self,
        request: &OrderRequest,
        spec: &InstrumentSpec,
        now_ms: u64,
    ) -> Result<Size, AdmissionError> {
        let result = self.check_gates(request, spec, now_ms);
        if let Err(err) = &result {
            Metrics::admission_blocked(err.gate(), &request.symbol);
            debug!(
                symbol = %request.symbol,
                side = %request.side,
                gate = err.gate(),
                "Order blocked: {err}"
            );
        }
        result
    }

    fn check_gates(
        &self,
        request: &OrderRequest,
        spec: &InstrumentSpec,
        now_ms: u64,
    ) -> Result<Size, AdmissionError> {
        let symbol = request.symbol.as_str();

        // Gate 1: throttle
        if !self.risk.throttle.allowed(symbol, ActionKind::Create, now_ms) {
            return Err(AdmissionError::Throttled {
                kind: ActionKind::Create,
            });
        }

        // Gate 2: pause
        self.check_pause()?;

        // Gate 3: scheduler
        match self.risk.scheduler.check(symbol, now_ms) {
            SchedulerDecision::Open => {}
            SchedulerDecision::Closed => return Err(AdmissionError::SchedulerClosed),
            SchedulerDecision::Cooldown => return Err(AdmissionError::SchedulerCooldown),
        }

        // Gate 4: portfolio cap
        let qty = self.check_portfolio(request, spec)?;

        // Gate 5: circuit
        if let Some(circuit) = &self.risk.circuit {
            if !circuit.allow(ActionKind::Create, now_ms) {
                return Err(AdmissionError::CircuitOpen);
            }
        }

        Ok(qty)
    }

    fn check_pause(&self) -> Result<(), AdmissionError> {
        if let Some(reason) = self.risk.pause.reason() {
            return Err(AdmissionError::Paused {
                reason: reason.to_string(),
            });
        }
        if self.risk.guard.is_paused() {
            return Err(AdmissionError::Paused {
                reason: self
                    .risk
                    .guard
                    .reason()
                    .unwrap_or_else(|| "runtime guard".to_string()),
            });
        }
        Ok(())
    }

    /// Level cap, then the USD budget. The budget may shrink the qty,
    /// never grow it. Symbols without a target are not capped.
    fn check_portfolio(
        &self,
        request: &OrderRequest,
        spec: &InstrumentSpec,
    ) -> Result<Size, AdmissionError> {
        let Some(target) = self.targets.get(&request.symbol) else {
            return Ok(request.qty);
        };
        let (staged_levels, staged_usd) = self.bus.staged_places(&request.symbol, request.side);

        let mut cap = target.max_levels as usize;
        if let Some(limit) = self.overrides.read().levels_per_side_max {
            cap = cap.min(limit as usize);
        }
        let active = self.table.active_levels(&request.symbol, request.side) + staged_levels;
        if active >= cap {
            return Err(AdmissionError::LevelCapReached { active, cap });
        }

        let active_usd = self.table.active_usd(&request.symbol, request.side) + staged_usd;
        let available = target.target_usd - active_usd;
        if available <= Decimal::ZERO {
            return Err(AdmissionError::BudgetExhausted {
                active_usd,
                target_usd: target.target_usd,
            });
        }

        let reference = request
            .price
            .or_else(|| self.mids.get(&request.symbol).map(|q| q.mid));
        let Some(price) = reference.filter(|p| p.is_positive()) else {
            return Ok(request.qty);
        };
        if request.qty.notional(price) <= available {
            return Ok(request.qty);
        }
        let shrunk = Size::new(available / price.0).floor_to_lot(spec.lot_size);
        if !shrunk.is_positive() {
            return Err(AdmissionError::NonPositiveQty);
        }
        debug!(
            symbol = %request.symbol,
            requested = %request.qty,
            shrunk = %shrunk,
            "Order qty shrunk to fit budget"
        );
        Ok(shrunk)
    }

    async fn apply_backoff(&self, symbol: &str, now_ms: u64) {
        let error_rate = f64::from_bits(self.error_rate_bits.load(Ordering::Relaxed));
        let ws_lag_ms = self.ws_lag_ms.load(Ordering::Relaxed);
        let backoff_ms = self
            .risk
            .throttle
            .compute_backoff_ms(error_rate, ws_lag_ms, symbol, now_ms);
        if backoff_ms > 0 {
            debug!(symbol, backoff_ms, "Adaptive backoff before send");
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        }
    }

    // ------------------------------------------------------------------
    // Place
    // ------------------------------------------------------------------

    /// Admit and send a new order. Returns its client id.
    ///
    /// In shadow mode the order is confirmed locally: no gateway call and
    /// no table entry, and the returned id carries a `shadow:` prefix.
    pub async fn place(&self, params: PlaceParams) -> OrderResult<ClientOrderId> {
        let now = self.clock.now_ms();
        let (mut request, spec) = self.prepare(&params)?;
        request.qty = self.admit(&request, &spec, now)?;
        self.apply_backoff(&request.symbol, now).await;

        if self.is_shadow() {
            return Ok(self.shadow_confirm(&request, params.client_order_id.as_ref()));
        }

        let client_order_id = params
            .client_order_id
            .unwrap_or_else(|| self.ids.next(&request.symbol, request.side));
        self.risk
            .throttle
            .on_event(&request.symbol, ActionKind::Create, now);

        let place = PlaceRequest {
            client_order_id,
            order: request,
        };
        match self.gateway.place(place.clone()).await {
            Ok(ack) => self.record_ack(&place, ack),
            Err(err) => {
                self.record_reject(place.symbol(), &err);
                Err(err.into())
            }
        }
    }

    fn shadow_id(request: &OrderRequest, client_order_id: Option<&ClientOrderId>) -> ClientOrderId {
        if let Some(id) = client_order_id.filter(|id| !id.is_empty()) {
            return ClientOrderId::from(format!("shadow:{id}"));
        }
        let price = request
            .price
            .map(|p| p.to_string())
            .unwrap_or_else(|| "MKT".to_string());
        let key = format!(
            "{}|{}|{}|{}",
            request.symbol.to_uppercase(),
            request.side.as_str(),
            price,
            request.qty
        );
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        ClientOrderId::from(format!("shadow:h{}", &digest[..12]))
    }

    fn shadow_confirm(
        &self,
        request: &OrderRequest,
        client_order_id: Option<&ClientOrderId>,
    ) -> ClientOrderId {
        let id = Self::shadow_id(request, client_order_id);
        let cohort = self.router.route_and_count(&id);
        Metrics::shadow_order(&request.symbol);
        info!(
            cloid = %id,
            symbol = %request.symbol,
            side = %request.side,
            qty = %request.qty,
            cohort = %cohort,
            "Shadow order confirmed locally"
        );
        id
    }

    /// Insert an acknowledged order. The venue's echoed id wins when set.
    /// An echoed id that is already active is refused; the tracked order
    /// is left untouched.
    fn record_ack(&self, place: &PlaceRequest, ack: PlaceAck) -> OrderResult<ClientOrderId> {
        let now = self.clock.now_ms();
        let client_order_id = if ack.client_order_id.is_empty() {
            place.client_order_id.clone()
        } else {
            ack.client_order_id
        };
        let cohort = self.router.route(&client_order_id);
        let order = Order::new(client_order_id.clone(), ack.order_id, &place.order, now)
            .with_cohort(cohort);

        self.risk.guard.on_send_ok();
        if let Some(circuit) = &self.risk.circuit {
            circuit.record_success(now);
        }
        if let Err(order) = self.table.insert_new(order) {
            Metrics::order_rejected(place.symbol(), "duplicate_client_id");
            error!(
                cloid = %client_order_id,
                order_id = %order.order_id,
                symbol = %place.symbol(),
                "Venue acknowledged an order under an active client id, not tracked"
            );
            return Err(OrderError::DuplicateClientId(client_order_id));
        }
        self.router.route_and_count(&client_order_id);
        Metrics::order_created(place.symbol(), place.order.side.as_str());
        self.refresh_exposure(place.symbol());
        debug!(
            cloid = %client_order_id,
            symbol = %place.symbol(),
            cohort = %cohort,
            "Order acknowledged"
        );
        Ok(client_order_id)
    }

    fn record_reject(&self, symbol: &str, err: &GatewayError) {
        let code = err.code.as_str();
        self.risk.guard.on_reject(code);
        if let Some(circuit) = &self.risk.circuit {
            circuit.record_failure(self.clock.now_ms());
        }
        Metrics::order_rejected(symbol, code);
        warn!(symbol, code, "Order rejected: {err}");
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    fn amend_policy(&self, cohort: Cohort) -> AmendPolicy {
        let config = self.cohorts.get(cohort);
        let overrides = self.overrides.read();
        AmendPolicy {
            min_time_in_book_ms: overrides
                .min_time_in_book_ms
                .unwrap_or(config.min_time_in_book_ms),
            price_threshold_bps: overrides
                .replace_threshold_bps
                .unwrap_or(config.amend_price_threshold_bps),
            size_threshold: config.amend_size_threshold,
        }
    }

    /// Move a resting order to a new price and/or size.
    ///
    /// Amends in place when eligible; otherwise, or when the venue refuses
    /// the amend, cancels and places a new order.
    pub async fn update(
        &self,
        client_order_id: &ClientOrderId,
        new_price: Option<Price>,
        new_qty: Option<Size>,
    ) -> OrderResult<UpdateOutcome> {
        let now = self.clock.now_ms();
        let order = self
            .table
            .get(client_order_id)
            .ok_or_else(|| OrderError::NotFound(client_order_id.clone()))?;
        if new_price.is_none() && new_qty.is_none() {
            return Err(OrderError::InvalidRequest("nothing to update".into()));
        }
        if order.status == OrderStatus::Replaced {
            return Err(OrderError::InvalidRequest(format!(
                "{client_order_id} is being replaced"
            )));
        }

        let symbol = order.symbol.as_str();
        if !self.risk.throttle.allowed(symbol, ActionKind::Amend, now) {
            let err = AdmissionError::Throttled {
                kind: ActionKind::Amend,
            };
            Metrics::admission_blocked(err.gate(), symbol);
            return Err(err.into());
        }
        if let Err(err) = self.check_pause() {
            Metrics::admission_blocked(err.gate(), symbol);
            return Err(err.into());
        }

        let spec = self.instruments.get(symbol);
        let policy = self.amend_policy(order.cohort);
        match amend::evaluate(&order, new_price, new_qty, &spec, &policy, now) {
            Ok(target) => {
                Metrics::amend(symbol, "attempt");
                let circuit_open = self
                    .risk
                    .circuit
                    .as_ref()
                    .is_some_and(|c| !c.allow(ActionKind::Amend, now));
                if circuit_open {
                    Metrics::amend(symbol, "fallback");
                    debug!(cloid = %client_order_id, "Circuit open, amend skipped");
                } else {
                    self.risk.throttle.on_event(symbol, ActionKind::Amend, now);
                    let request = AmendRequest {
                        symbol: order.symbol.clone(),
                        order_id: Some(order.order_id.clone()).filter(|id| !id.is_empty()),
                        client_order_id: Some(client_order_id.clone()),
                        price: Some(target.price),
                        qty: Some(target.qty),
                    };
                    match self.gateway.amend(request).await {
                        Ok(()) => {
                            let done = self.clock.now_ms();
                            if let Some(circuit) = &self.risk.circuit {
                                circuit.record_success(done);
                            }
                            self.table.update(client_order_id, |o| {
                                o.apply_amend(target.price, target.qty, done)
                            });
                            Metrics::amend(symbol, "success");
                            self.refresh_exposure(symbol);
                            debug!(
                                cloid = %client_order_id,
                                price = %target.price,
                                qty = %target.qty,
                                "Order amended"
                            );
                            return Ok(UpdateOutcome::Amended(client_order_id.clone()));
                        }
                        Err(err) => {
                            if let Some(circuit) = &self.risk.circuit {
                                circuit.record_failure(self.clock.now_ms());
                            }
                            Metrics::amend(symbol, "fallback");
                            warn!(
                                cloid = %client_order_id,
                                code = err.code.as_str(),
                                "Amend failed, falling back to cancel-then-place: {err}"
                            );
                        }
                    }
                }
            }
            Err(reason) => {
                Metrics::amend(symbol, "ineligible");
                debug!(
                    cloid = %client_order_id,
                    reason = reason.as_str(),
                    "Amend ineligible, replacing"
                );
            }
        }

        self.replace(order, new_price, new_qty).await
    }

    /// Cancel-then-place.
    ///
    /// The old order is marked `Replaced` while its cancel is in flight and
    /// leaves the table once the cancel succeeds, before the new place is
    /// sent. A failed cancel, or dropping this future before the cancel
    /// resolved, restores the prior status.
    async fn replace(
        &self,
        order: Order,
        new_price: Option<Price>,
        new_qty: Option<Size>,
    ) -> OrderResult<UpdateOutcome> {
        let old = order.client_order_id.clone();
        let prior = order.status;
        let now = self.clock.now_ms();
        let marked = self
            .table
            .update(&old, |o| o.set_status(OrderStatus::Replaced, now))
            .ok_or_else(|| OrderError::NotFound(old.clone()))?;
        if !marked {
            return Err(OrderError::InvalidRequest(format!(
                "{old} cannot be replaced from {prior}"
            )));
        }

        let mut guard = ReplaceGuard {
            manager: self,
            client_order_id: old.clone(),
            prior,
            armed: true,
        };

        self.risk
            .throttle
            .on_event(&order.symbol, ActionKind::Cancel, now);
        if let Err(err) = self.gateway.cancel(Self::cancel_target(&order)).await {
            guard.restore();
            warn!(cloid = %old, "Replace aborted, cancel failed: {err}");
            return Err(err.into());
        }
        guard.armed = false;
        self.table.remove(&old);
        Metrics::order_cancelled(&order.symbol, "replace");

        let remaining = order.remaining_qty();
        let params = PlaceParams {
            symbol: order.symbol.clone(),
            side: order.side,
            order_type: order.order_type,
            qty: new_qty.unwrap_or(remaining),
            price: new_price.or(Some(order.price)),
            time_in_force: order.time_in_force,
            client_order_id: None,
        };
        let placed = self.place(params).await;
        self.refresh_exposure(&order.symbol);
        let new = placed?;
        Metrics::order_replaced(&order.symbol);
        debug!(old = %old, new = %new, "Order replaced");
        Ok(UpdateOutcome::Replaced { old, new })
    }

    // ------------------------------------------------------------------
    // Cancel
    // ------------------------------------------------------------------

    fn cancel_target(order: &Order) -> CancelTarget {
        CancelTarget {
            symbol: order.symbol.clone(),
            order_id: Some(order.order_id.clone()).filter(|id| !id.is_empty()),
            client_order_id: Some(order.client_order_id.clone()),
        }
    }

    /// Cancel one order. Cancels bypass admission.
    pub async fn cancel(&self, client_order_id: &ClientOrderId) -> OrderResult<()> {
        self.cancel_with_source(client_order_id, "api").await
    }

    async fn cancel_with_source(
        &self,
        client_order_id: &ClientOrderId,
        source: &'static str,
    ) -> OrderResult<()> {
        let order = self
            .table
            .get(client_order_id)
            .ok_or_else(|| OrderError::NotFound(client_order_id.clone()))?;
        self.risk
            .throttle
            .on_event(&order.symbol, ActionKind::Cancel, self.clock.now_ms());

        self.gateway.cancel(Self::cancel_target(&order)).await?;

        let now = self.clock.now_ms();
        self.table
            .update_and_prune(client_order_id, |o| o.mark_cancelled(now));
        Metrics::order_cancelled(&order.symbol, source);
        self.refresh_exposure(&order.symbol);
        debug!(cloid = %client_order_id, source, "Order cancelled");
        Ok(())
    }

    /// Cancel every tracked order, optionally for one symbol.
    ///
    /// Failures are logged and skipped. Returns the number cancelled.
    pub async fn cancel_all(&self, symbol: Option<&str>) -> usize {
        let ids = self.table.client_ids(symbol);
        let total = ids.len();
        let mut cancelled = 0;
        for id in ids {
            match self.cancel_with_source(&id, "cancel_all").await {
                Ok(()) => cancelled += 1,
                Err(err) => warn!(cloid = %id, "Cancel failed during cancel_all: {err}"),
            }
        }
        if total > 0 {
            info!(
                symbol = symbol.unwrap_or("*"),
                cancelled,
                failed = total - cancelled,
                "Cancel all complete"
            );
        }
        cancelled
    }

    pub async fn cancel_all_for_symbol(&self, symbol: &str) -> usize {
        self.cancel_all(Some(symbol)).await
    }

    // ------------------------------------------------------------------
    // Anti-stale sweep
    // ------------------------------------------------------------------

    /// Cancel TTL-expired orders and reprice drifted ones.
    ///
    /// Each order is handled independently: one failure does not stop the
    /// sweep.
    pub async fn check_and_refresh_stale_orders(&self, symbol: Option<&str>) -> StaleSweepSummary {
        if !self.config.enable_anti_stale_guard {
            return StaleSweepSummary::disabled(symbol);
        }
        let now = self.clock.now_ms();
        let mut summary = StaleSweepSummary::enabled(symbol);

        for order in self.table.snapshot(symbol) {
            if order.status == OrderStatus::Replaced {
                continue;
            }
            summary.checked += 1;
            let age_ms = order.age_ms(now);
            summary.record_age(age_ms);
            Metrics::order_age_bucket(stale::age_bucket(age_ms));

            let config = self.cohorts.get(order.cohort);
            let mid = self
                .mids
                .fresh_mid(&order.symbol, now, self.config.mid_max_age_ms);
            let Some((reason, drift_bps)) = stale::classify(&order, mid, config, now) else {
                continue;
            };

            let outcome = match reason {
                StaleReason::TtlExpired => {
                    match self
                        .cancel_with_source(&order.client_order_id, "stale_ttl")
                        .await
                    {
                        Ok(()) => {
                            Metrics::stale_cancel(&order.symbol, "ttl");
                            StaleOutcome::Cancelled
                        }
                        Err(err) => StaleOutcome::Failed(err.to_string()),
                    }
                }
                StaleReason::PriceDrift => {
                    self.refresh_drifted(&order, config.price_drift_bps).await
                }
            };
            if let StaleOutcome::Failed(err) = &outcome {
                warn!(
                    cloid = %order.client_order_id,
                    reason = reason.as_str(),
                    "Stale order handling failed: {err}"
                );
            }
            summary.record(StaleAction {
                client_order_id: order.client_order_id.clone(),
                symbol: order.symbol.clone(),
                reason,
                drift_bps,
                outcome,
            });
        }

        if !summary.actions.is_empty() {
            info!(
                symbol = symbol.unwrap_or("*"),
                checked = summary.checked,
                ttl_cancels = summary.ttl_cancels,
                drift_refreshes = summary.drift_refreshes,
                errors = summary.errors,
                "Anti-stale sweep"
            );
        }
        summary
    }

    async fn refresh_drifted(&self, order: &Order, drift_threshold_bps: Decimal) -> StaleOutcome {
        let now = self.clock.now_ms();
        let Some(mid) = self
            .mids
            .fresh_mid(&order.symbol, now, self.config.mid_max_age_ms)
        else {
            return match self
                .cancel_with_source(&order.client_order_id, "stale_drift")
                .await
            {
                Ok(()) => {
                    Metrics::stale_cancel(&order.symbol, "drift_fallback");
                    StaleOutcome::CancelledWithoutMid
                }
                Err(err) => StaleOutcome::Failed(err.to_string()),
            };
        };

        let spec = self.instruments.get(&order.symbol);
        let target = spec.round_price(stale::refresh_price(mid, order.side, drift_threshold_bps));
        match self
            .update(&order.client_order_id, Some(target), None)
            .await
        {
            Ok(outcome) => {
                Metrics::stale_refresh(&order.symbol);
                StaleOutcome::Refreshed {
                    client_order_id: outcome.client_order_id().clone(),
                }
            }
            Err(err) => StaleOutcome::Failed(err.to_string()),
        }
    }

    // ------------------------------------------------------------------
    // Remote sync and push events
    // ------------------------------------------------------------------

    fn order_from_snapshot(
        &self,
        snapshot: &OrderSnapshot,
        client_order_id: ClientOrderId,
        now_ms: u64,
    ) -> Order {
        let request =
            OrderRequest::limit(&snapshot.symbol, snapshot.side, snapshot.qty, snapshot.price);
        let created_ms = if snapshot.created_ms == 0 {
            now_ms
        } else {
            snapshot.created_ms
        };
        let cohort = self.router.route(&client_order_id);
        let mut order = Order::new(client_order_id, snapshot.order_id.clone(), &request, created_ms)
            .with_cohort(cohort);
        order.overwrite_from_remote(
            snapshot.status,
            snapshot.filled_qty,
            snapshot.remaining_qty,
            now_ms,
        );
        order
    }

    /// Adopt the venue's active orders into the table.
    ///
    /// Known orders take status and quantities from the venue; unknown ones
    /// are inserted. Keyed by client id, so nothing is counted twice.
    pub async fn sync_with_remote(&self, symbol: Option<&str>) -> OrderResult<usize> {
        let remote = self
            .gateway
            .query_active(symbol.map(str::to_string))
            .await?;
        let now = self.clock.now_ms();
        let mut synced = 0;
        let mut adopted = 0;

        for snapshot in &remote {
            if snapshot.status.is_terminal() {
                continue;
            }
            let client_order_id = if snapshot.client_order_id.is_empty() {
                ClientOrderId::from(snapshot.order_id.clone())
            } else {
                snapshot.client_order_id.clone()
            };
            let known = self
                .table
                .update(&client_order_id, |o| {
                    o.overwrite_from_remote(
                        snapshot.status,
                        snapshot.filled_qty,
                        snapshot.remaining_qty,
                        now,
                    );
                    if o.order_id.is_empty() {
                        o.order_id = snapshot.order_id.clone();
                    }
                })
                .is_some();
            if !known {
                let order = self.order_from_snapshot(snapshot, client_order_id, now);
                self.table.insert(order);
                adopted += 1;
            }
            synced += 1;
        }

        self.refresh_all_exposure();
        info!(
            symbol = symbol.unwrap_or("*"),
            synced,
            adopted,
            "Synced with remote"
        );
        Ok(synced)
    }

    /// Apply a pushed order update. Unknown ids are ignored.
    ///
    /// The cumulative fill is applied first. A status change the state
    /// machine forbids is logged and dropped.
    pub fn handle_order_update(&self, event: &OrderUpdateEvent) -> bool {
        let now = self.clock.now_ms();
        let result = self.table.update_and_prune(&event.client_order_id, |o| {
            let mut changed = false;
            if let Some(order_id) = event.order_id.as_ref().filter(|id| !id.is_empty()) {
                if o.order_id.is_empty() {
                    o.order_id = order_id.clone();
                    changed = true;
                }
            }
            if let Some(cum) = event.cum_filled_qty {
                changed |= o.apply_cumulative_fill(cum, now);
            }
            let mut forbidden = None;
            if let Some(status) = event.status.filter(|s| *s != o.status) {
                if status == OrderStatus::Filled {
                    o.mark_filled(now);
                    changed = true;
                } else if o.set_status(status, now) {
                    changed = true;
                } else {
                    forbidden = Some((o.status, status));
                }
            }
            (changed, forbidden, o.symbol.clone())
        });

        let Some(((changed, forbidden, symbol), removed)) = result else {
            Metrics::push_event("order_update", "unknown");
            debug!(cloid = %event.client_order_id, "Order update for unknown id ignored");
            return false;
        };
        if let Some((from, to)) = forbidden {
            warn!(
                cloid = %event.client_order_id,
                from = %from,
                to = %to,
                "Forbidden status transition ignored"
            );
        }
        if let Some(order) = removed {
            debug!(cloid = %order.client_order_id, status = %order.status, "Order closed");
        }
        self.refresh_exposure(&symbol);
        Metrics::push_event("order_update", if changed { "applied" } else { "noop" });
        changed
    }

    /// Record a pushed execution. Fill quantities move only through order
    /// updates; this keeps the last fill price and the fill metrics.
    pub fn handle_execution_update(&self, event: &ExecutionEvent) -> bool {
        let now = self.clock.now_ms();
        let touched = self.table.update(&event.client_order_id, |o| {
            o.last_fill_price = Some(event.exec_price);
            o.last_update_ms = now;
            (o.symbol.clone(), o.side)
        });
        let Some((symbol, side)) = touched else {
            Metrics::push_event("execution", "unknown");
            return false;
        };
        let notional = event.exec_qty.notional(event.exec_price);
        Metrics::fill_notional(&symbol, side.as_str(), notional.to_f64().unwrap_or(0.0));
        Metrics::push_event("execution", "applied");
        debug!(
            cloid = %event.client_order_id,
            qty = %event.exec_qty,
            price = %event.exec_price,
            maker = event.is_maker,
            "Execution recorded"
        );
        true
    }

    // ------------------------------------------------------------------
    // Staged commands
    // ------------------------------------------------------------------

    /// Admit an order and buffer it on the command bus instead of sending.
    ///
    /// Staged places count toward the level and budget caps until flushed.
    pub async fn stage_place(&self, params: PlaceParams) -> OrderResult<ClientOrderId> {
        let now = self.clock.now_ms();
        let (mut request, spec) = self.prepare(&params)?;
        request.qty = self.admit(&request, &spec, now)?;
        self.apply_backoff(&request.symbol, now).await;

        if self.is_shadow() {
            return Ok(self.shadow_confirm(&request, params.client_order_id.as_ref()));
        }

        let client_order_id = params
            .client_order_id
            .unwrap_or_else(|| self.ids.next(&request.symbol, request.side));
        self.risk
            .throttle
            .on_event(&request.symbol, ActionKind::Create, now);
        self.bus.enqueue(Command::place(
            PlaceRequest {
                client_order_id: client_order_id.clone(),
                order: request,
            },
            now,
        ));
        Ok(client_order_id)
    }

    pub fn stage_cancel(&self, client_order_id: &ClientOrderId) -> OrderResult<()> {
        let order = self
            .table
            .get(client_order_id)
            .ok_or_else(|| OrderError::NotFound(client_order_id.clone()))?;
        self.bus
            .enqueue(Command::cancel(Self::cancel_target(&order), self.clock.now_ms()));
        Ok(())
    }

    pub fn stage_amend(
        &self,
        client_order_id: &ClientOrderId,
        new_price: Option<Price>,
        new_qty: Option<Size>,
    ) -> OrderResult<()> {
        let order = self
            .table
            .get(client_order_id)
            .ok_or_else(|| OrderError::NotFound(client_order_id.clone()))?;
        self.bus.enqueue(Command::amend(
            order.symbol,
            client_order_id.clone(),
            new_price,
            new_qty,
            self.clock.now_ms(),
        ));
        Ok(())
    }

    /// Coalesce and apply one symbol's buffered commands.
    pub async fn flush_symbol(&self, symbol: &str) -> FlushReport {
        let batches = self.bus.drain_symbol(symbol);
        self.apply_batches(symbol, batches).await
    }

    /// Coalesce and apply every buffered command.
    pub async fn flush_all(&self) -> FlushReport {
        let mut report = FlushReport::default();
        for (symbol, batches) in self.bus.coalesce_and_drain() {
            report.merge(self.apply_batches(&symbol, batches).await);
        }
        report
    }

    /// Send coalesced batches in order and write results into the table.
    /// Per-item failures are counted, never raised.
    pub async fn apply_batches(&self, symbol: &str, batches: Vec<BatchCommand>) -> FlushReport {
        let mut report = FlushReport::default();
        for batch in batches {
            if batch.is_empty() {
                continue;
            }
            let op = batch.kind().as_str();
            report.batches += 1;
            Metrics::flush_batch(op, batch.len());

            let (success, failed) = match batch {
                BatchCommand::BatchCancel { symbol, targets } => {
                    let outcome = self
                        .gateway
                        .batch_cancel(symbol.clone(), targets.clone())
                        .await;
                    let now = self.clock.now_ms();
                    for (target, result) in targets.iter().zip(&outcome.results) {
                        match result {
                            Ok(()) => {
                                if let Some(id) = &target.client_order_id {
                                    self.table.update_and_prune(id, |o| o.mark_cancelled(now));
                                }
                                Metrics::order_cancelled(&symbol, "flush");
                            }
                            Err(err) => warn!(
                                symbol = %symbol,
                                cloid = ?target.client_order_id,
                                "Batched cancel failed: {err}"
                            ),
                        }
                    }
                    (outcome.success_count(), outcome.failed_count())
                }
                BatchCommand::BatchPlace { symbol, requests } => {
                    let outcome = self
                        .gateway
                        .batch_place(symbol.clone(), requests.clone())
                        .await;
                    let (mut success, mut failed) = (0, 0);
                    for (request, result) in requests.iter().zip(outcome.results) {
                        match result {
                            Ok(ack) => match self.record_ack(request, ack) {
                                Ok(_) => success += 1,
                                Err(_) => failed += 1,
                            },
                            Err(err) => {
                                self.record_reject(&symbol, &err);
                                failed += 1;
                            }
                        }
                    }
                    (success, failed)
                }
                BatchCommand::Amend {
                    client_order_id,
                    price,
                    qty,
                    ..
                } => match self.update(&client_order_id, price, qty).await {
                    Ok(_) => (1, 0),
                    Err(err) => {
                        warn!(cloid = %client_order_id, "Batched amend failed: {err}");
                        (0, 1)
                    }
                },
            };
            Metrics::flush_items(op, success, failed);
            report.success += success;
            report.failed += failed;
        }
        if report.batches > 0 {
            self.refresh_exposure(symbol);
            debug!(
                symbol,
                batches = report.batches,
                success = report.success,
                failed = report.failed,
                "Flushed"
            );
        }
        report
    }

    // ------------------------------------------------------------------
    // Snapshot persistence
    // ------------------------------------------------------------------

    /// Write the active table to `path` as JSON via a temp file and rename.
    pub fn save_snapshot(&self, path: &Path) -> OrderResult<usize> {
        let mut orders = self.table.snapshot(None);
        orders.sort_by(|a, b| a.client_order_id.cmp(&b.client_order_id));
        let count = orders.len();
        let body = serde_json::to_vec_pretty(&TableSnapshot {
            saved_ms: self.clock.now_ms(),
            orders,
        })?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, path)?;
        info!(path = %path.display(), orders = count, "Order snapshot saved");
        Ok(count)
    }

    /// Restore orders saved by [`save_snapshot`](Self::save_snapshot).
    /// A missing file restores nothing.
    pub fn load_snapshot(&self, path: &Path) -> OrderResult<usize> {
        let body = match std::fs::read(path) {
            Ok(body) => body,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No order snapshot to restore");
                return Ok(0);
            }
            Err(err) => return Err(err.into()),
        };
        let snapshot: TableSnapshot = serde_json::from_slice(&body)?;
        let mut loaded = 0;
        for mut order in snapshot.orders {
            order.normalize();
            if order.status.is_terminal() || order.client_order_id.is_empty() {
                continue;
            }
            // A replace cut short by shutdown; the cancel never confirmed.
            if order.status == OrderStatus::Replaced {
                let resumed = if order.filled_qty().is_positive() {
                    OrderStatus::PartiallyFilled
                } else {
                    OrderStatus::New
                };
                order.set_status(resumed, order.last_update_ms);
            }
            self.table.insert(order);
            loaded += 1;
        }
        self.refresh_all_exposure();
        info!(
            path = %path.display(),
            loaded,
            saved_ms = snapshot.saved_ms,
            "Order snapshot restored"
        );
        Ok(loaded)
    }
}
