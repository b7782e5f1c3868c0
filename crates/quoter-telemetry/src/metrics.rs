//! Prometheus metrics for the quoter.
//!
//! Covers:
//! - Order lifecycle (creates, cancels, replaces, amends, rejects)
//! - Admission gate blocks
//! - Active exposure per symbol and side
//! - Reconciliation actions and the risk pause
//! - Stale-order sweep
//! - Command coalescing and tick latency
//!
//! Metrics are a write-only sink; nothing reads them back for decisions.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration fails,
//! it indicates a fatal configuration error (e.g., duplicate metric names)
//! that should cause an immediate crash at startup rather than silent failure.
//! These panics only occur during static initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram,
    register_histogram_vec, CounterVec, Gauge, GaugeVec, Histogram, HistogramVec,
};

// =============================================================================
// Order lifecycle
// =============================================================================

/// Orders acknowledged by the venue.
pub static ORDERS_CREATED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quoter_orders_created_total",
        "Orders acknowledged by the venue",
        &["symbol", "side"]
    )
    .unwrap()
});

/// Orders cancelled (any path).
pub static ORDERS_CANCELLED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quoter_orders_cancelled_total",
        "Orders cancelled",
        &["symbol", "source"]
    )
    .unwrap()
});

/// Cancel-then-place replacements.
pub static ORDERS_REPLACED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quoter_orders_replaced_total",
        "Cancel-then-place replacements",
        &["symbol"]
    )
    .unwrap()
});

/// Orders the venue rejected.
pub static ORDERS_REJECTED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quoter_orders_rejected_total",
        "Orders rejected by the venue",
        &["symbol", "code"]
    )
    .unwrap()
});

/// Amend attempts / outcomes.
/// Labels: outcome (attempt/success/failed/ineligible)
pub static AMEND_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quoter_amend_total",
        "Amend attempts and outcomes",
        &["symbol", "outcome"]
    )
    .unwrap()
});

/// Admission gate blocks.
pub static ADMISSION_BLOCKED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quoter_admission_blocked_total",
        "Orders blocked before reaching the venue",
        &["gate", "symbol"]
    )
    .unwrap()
});

/// Shadow-mode confirmations.
pub static SHADOW_ORDERS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quoter_shadow_orders_total",
        "Orders confirmed locally in shadow mode",
        &["symbol"]
    )
    .unwrap()
});

/// Orders routed per cohort.
pub static ROUTED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quoter_routed_total",
        "Orders routed to each rollout cohort",
        &["cohort"]
    )
    .unwrap()
});

/// Push events processed.
/// Labels: kind (order/execution), outcome (applied/ignored/unknown)
pub static PUSH_EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quoter_push_events_total",
        "Order and execution push events",
        &["kind", "outcome"]
    )
    .unwrap()
});

/// Executed notional in USD.
pub static FILL_NOTIONAL_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quoter_fill_notional_usd_total",
        "Executed notional in USD",
        &["symbol", "side"]
    )
    .unwrap()
});

// =============================================================================
// Exposure
// =============================================================================

/// Active resting levels.
pub static ACTIVE_LEVELS: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "quoter_active_levels",
        "Active resting orders",
        &["symbol", "side"]
    )
    .unwrap()
});

/// Active remaining notional.
pub static ACTIVE_USD: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "quoter_active_usd",
        "Remaining notional of active orders in USD",
        &["symbol", "side"]
    )
    .unwrap()
});

// =============================================================================
// Reconciliation
// =============================================================================

/// Reconciliation repair actions.
pub static RECONCILE_ACTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quoter_reconcile_actions_total",
        "Reconciliation actions",
        &["action"]
    )
    .unwrap()
});

/// Local/remote order count mismatch ratio of the last cycle.
pub static RECONCILE_MISMATCH_RATIO: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "quoter_reconcile_mismatch_ratio",
        "Local vs remote order count mismatch ratio"
    )
    .unwrap()
});

/// Risk pause (1 = quoting paused).
pub static RISK_PAUSED: Lazy<Gauge> =
    Lazy::new(|| register_gauge!("quoter_risk_paused", "Quoting paused (1=paused)").unwrap());

// =============================================================================
// Stale sweep
// =============================================================================

/// Stale-order cancels. Labels: reason (ttl/drift_fallback)
pub static STALE_CANCELS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quoter_stale_cancels_total",
        "Orders cancelled by the stale sweep",
        &["symbol", "reason"]
    )
    .unwrap()
});

/// Drift refreshes toward the mid.
pub static STALE_REFRESHES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quoter_stale_refreshes_total",
        "Orders refreshed toward mid by the stale sweep",
        &["symbol"]
    )
    .unwrap()
});

/// Age of orders seen by the stale sweep, by bucket.
pub static ORDER_AGE_BUCKET_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quoter_order_age_bucket_total",
        "Order ages observed by the stale sweep",
        &["bucket"]
    )
    .unwrap()
});

// =============================================================================
// Coalescing & ticks
// =============================================================================

/// Commands merged into batches. Labels: op (cancel/place)
pub static COALESCED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quoter_coalesced_commands_total",
        "Commands merged into batch calls",
        &["op"]
    )
    .unwrap()
});

/// Items per flushed batch.
pub static FLUSH_BATCH_SIZE: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "quoter_flush_batch_size",
        "Items per flushed batch",
        &["op"],
        vec![1.0, 2.0, 5.0, 10.0, 20.0, 50.0]
    )
    .unwrap()
});

/// Flush item outcomes. Labels: op, outcome (success/failed)
pub static FLUSH_ITEMS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quoter_flush_items_total",
        "Flushed items by outcome",
        &["op", "outcome"]
    )
    .unwrap()
});

/// Tick duration in milliseconds.
pub static TICK_DURATION_MS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "quoter_tick_duration_ms",
        "Wall-clock duration of one tick in milliseconds",
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 200.0, 500.0, 1000.0]
    )
    .unwrap()
});

/// Per-symbol intent generation failures.
pub static TICK_SYMBOL_ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quoter_tick_symbol_errors_total",
        "Per-symbol intent generation failures",
        &["kind"]
    )
    .unwrap()
});

// =============================================================================
// Gateway & loops
// =============================================================================

/// Gateway retries after transient errors.
pub static GATEWAY_RETRIES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quoter_gateway_retries_total",
        "Retries after transient gateway errors",
        &["op", "code"]
    )
    .unwrap()
});

/// Circuit breaker state (0=closed, 1=half-open, 2=open).
pub static CIRCUIT_STATE: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "quoter_circuit_state",
        "Circuit breaker state (0=closed, 1=half-open, 2=open)"
    )
    .unwrap()
});

/// Last heartbeat of each background loop (Unix ms).
pub static LOOP_HEARTBEAT_MS: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "quoter_loop_heartbeat_ms",
        "Last heartbeat of a background loop in Unix milliseconds",
        &["loop"]
    )
    .unwrap()
});

/// Background loop iteration errors.
pub static LOOP_ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quoter_loop_errors_total",
        "Background loop iteration errors",
        &["loop"]
    )
    .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    // =========================================================================
    // Order lifecycle
    // =========================================================================

    pub fn order_created(symbol: &str, side: &str) {
        ORDERS_CREATED_TOTAL
            .with_label_values(&[symbol, side])
            .inc();
    }

    /// `source` is the path that cancelled: manual, cancel_all, replace, stale.
    pub fn order_cancelled(symbol: &str, source: &str) {
        ORDERS_CANCELLED_TOTAL
            .with_label_values(&[symbol, source])
            .inc();
    }

    pub fn order_replaced(symbol: &str) {
        ORDERS_REPLACED_TOTAL.with_label_values(&[symbol]).inc();
    }

    pub fn order_rejected(symbol: &str, code: &str) {
        ORDERS_REJECTED_TOTAL
            .with_label_values(&[symbol, code])
            .inc();
    }

    pub fn amend(symbol: &str, outcome: &str) {
        AMEND_TOTAL.with_label_values(&[symbol, outcome]).inc();
    }

    pub fn admission_blocked(gate: &str, symbol: &str) {
        ADMISSION_BLOCKED_TOTAL
            .with_label_values(&[gate, symbol])
            .inc();
    }

    pub fn shadow_order(symbol: &str) {
        SHADOW_ORDERS_TOTAL.with_label_values(&[symbol]).inc();
    }

    pub fn routed(cohort: &str) {
        ROUTED_TOTAL.with_label_values(&[cohort]).inc();
    }

    pub fn push_event(kind: &str, outcome: &str) {
        PUSH_EVENTS_TOTAL.with_label_values(&[kind, outcome]).inc();
    }

    pub fn fill_notional(symbol: &str, side: &str, notional_usd: f64) {
        FILL_NOTIONAL_TOTAL
            .with_label_values(&[symbol, side])
            .inc_by(notional_usd.max(0.0));
    }

    // =========================================================================
    // Exposure
    // =========================================================================

    pub fn active_exposure(symbol: &str, side: &str, levels: usize, usd: f64) {
        ACTIVE_LEVELS
            .with_label_values(&[symbol, side])
            .set(levels as f64);
        ACTIVE_USD.with_label_values(&[symbol, side]).set(usd);
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    pub fn reconcile_action(action: &str) {
        RECONCILE_ACTIONS_TOTAL.with_label_values(&[action]).inc();
    }

    pub fn reconcile_mismatch(ratio: f64) {
        RECONCILE_MISMATCH_RATIO.set(ratio);
    }

    pub fn risk_paused(paused: bool) {
        RISK_PAUSED.set(if paused { 1.0 } else { 0.0 });
    }

    // =========================================================================
    // Stale sweep
    // =========================================================================

    pub fn stale_cancel(symbol: &str, reason: &str) {
        STALE_CANCELS_TOTAL
            .with_label_values(&[symbol, reason])
            .inc();
    }

    pub fn stale_refresh(symbol: &str) {
        STALE_REFRESHES_TOTAL.with_label_values(&[symbol]).inc();
    }

    pub fn order_age_bucket(bucket: &str) {
        ORDER_AGE_BUCKET_TOTAL.with_label_values(&[bucket]).inc();
    }

    // =========================================================================
    // Coalescing & ticks
    // =========================================================================

    pub fn coalesced(op: &str, count: usize) {
        if count > 0 {
            COALESCED_TOTAL
                .with_label_values(&[op])
                .inc_by(count as f64);
        }
    }

    pub fn flush_batch(op: &str, size: usize) {
        FLUSH_BATCH_SIZE
            .with_label_values(&[op])
            .observe(size as f64);
    }

    pub fn flush_items(op: &str, success: usize, failed: usize) {
        if success > 0 {
            FLUSH_ITEMS_TOTAL
                .with_label_values(&[op, "success"])
                .inc_by(success as f64);
        }
        if failed > 0 {
            FLUSH_ITEMS_TOTAL
                .with_label_values(&[op, "failed"])
                .inc_by(failed as f64);
        }
    }

    pub fn tick_duration(duration_ms: f64) {
        TICK_DURATION_MS.observe(duration_ms);
    }

    pub fn tick_symbol_error(kind: &str) {
        TICK_SYMBOL_ERRORS_TOTAL.with_label_values(&[kind]).inc();
    }

    // =========================================================================
    // Gateway & loops
    // =========================================================================

    pub fn gateway_retry(op: &str, code: &str) {
        GATEWAY_RETRIES_TOTAL.with_label_values(&[op, code]).inc();
    }

    pub fn circuit_state(state: u8) {
        CIRCUIT_STATE.set(f64::from(state));
    }

    pub fn loop_heartbeat(name: &str, now_ms: u64) {
        LOOP_HEARTBEAT_MS
            .with_label_values(&[name])
            .set(now_ms as f64);
    }

    pub fn loop_error(name: &str) {
        LOOP_ERRORS_TOTAL.with_label_values(&[name]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let before = ORDERS_CREATED_TOTAL
            .with_label_values(&["TESTSYM", "buy"])
            .get();
        Metrics::order_created("TESTSYM", "buy");
        Metrics::order_created("TESTSYM", "buy");
        let after = ORDERS_CREATED_TOTAL
            .with_label_values(&["TESTSYM", "buy"])
            .get();
        assert_eq!(after - before, 2.0);
    }

    #[test]
    fn test_exposure_gauges_overwrite() {
        Metrics::active_exposure("GAUGESYM", "sell", 3, 1500.0);
        Metrics::active_exposure("GAUGESYM", "sell", 1, 500.0);
        assert_eq!(
            ACTIVE_LEVELS.with_label_values(&["GAUGESYM", "sell"]).get(),
            1.0
        );
        assert_eq!(
            ACTIVE_USD.with_label_values(&["GAUGESYM", "sell"]).get(),
            500.0
        );
    }

    #[test]
    fn test_coalesced_zero_is_noop() {
        let before = COALESCED_TOTAL.with_label_values(&["noop_op"]).get();
        Metrics::coalesced("noop_op", 0);
        assert_eq!(COALESCED_TOTAL.with_label_values(&["noop_op"]).get(), before);
    }
}
