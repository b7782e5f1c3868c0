//! Tick orchestration.
//!
//! One tick turns market snapshots into staged commands and flushes them.
//! Parallel mode fans intent generation out over up to `max_parallel`
//! symbols at once and then flushes the command bus exactly once.
//! Sequential mode handles one symbol at a time, flushing after each.
//!
//! A failing, panicking or late symbol is reported in the tick result and
//! never stops the other symbols or the flush.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{self, StreamExt};
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use quoter_core::{ClientOrderId, MarketSnapshot, Price, Size};
use quoter_gateway::BoxFuture;
use quoter_telemetry::Metrics;

use crate::command_bus::BatchCommand;
use crate::error::OrderResult;
use crate::lifecycle::{FlushReport, OrderLifecycleManager, PlaceParams};

// ============================================================================
// Intents
// ============================================================================

/// What a strategy wants done for one symbol this tick.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Place(PlaceParams),
    Cancel(ClientOrderId),
    Amend {
        client_order_id: ClientOrderId,
        price: Option<Price>,
        qty: Option<Size>,
    },
}

/// Produces intents for one symbol from its snapshot and the current book.
pub trait IntentGenerator: Send + Sync {
    fn generate<'a>(
        &'a self,
        symbol: &'a str,
        snapshot: &'a MarketSnapshot,
        manager: &'a OrderLifecycleManager,
    ) -> BoxFuture<'a, OrderResult<Vec<Intent>>>;
}

// ============================================================================
// Config and results
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// False selects sequential mode.
    #[serde(default = "default_parallel_enabled")]
    pub parallel_enabled: bool,
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Per-symbol budget for intent generation and staging.
    #[serde(default = "default_tick_deadline_ms")]
    pub tick_deadline_ms: u64,
    /// Tick durations kept for percentiles.
    #[serde(default = "default_latency_window")]
    pub latency_window: usize,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

fn default_parallel_enabled() -> bool {
    true
}

fn default_max_parallel() -> usize {
    10
}

fn default_tick_deadline_ms() -> u64 {
    200
}

fn default_latency_window() -> usize {
    1_000
}

fn default_tick_interval_ms() -> u64 {
    1_000
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            parallel_enabled: default_parallel_enabled(),
            max_parallel: default_max_parallel(),
            tick_deadline_ms: default_tick_deadline_ms(),
            latency_window: default_latency_window(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickMode {
    Sequential,
    Parallel,
}

/// Staging counts of one symbol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SymbolReport {
    pub intents: usize,
    pub staged: usize,
    /// Intents refused at staging (admission, unknown order).
    pub refused: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickResult {
    pub tick_id: u64,
    pub mode: TickMode,
    pub symbols_processed: usize,
    pub symbol_errors: usize,
    /// Symbols without a market snapshot.
    pub symbols_skipped: usize,
    pub reports: BTreeMap<String, SymbolReport>,
    pub errors: BTreeMap<String, String>,
    pub flush: FlushReport,
    /// Flush passes over the command bus.
    pub flushes: usize,
    pub duration_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl TickResult {
    fn new(tick_id: u64, mode: TickMode) -> Self {
        Self {
            tick_id,
            mode,
            symbols_processed: 0,
            symbol_errors: 0,
            symbols_skipped: 0,
            reports: BTreeMap::new(),
            errors: BTreeMap::new(),
            flush: FlushReport::default(),
            flushes: 0,
            duration_ms: 0.0,
            p95_ms: 0.0,
            p99_ms: 0.0,
        }
    }

    fn record(&mut self, symbol: String, outcome: Result<SymbolReport, String>) {
        match outcome {
            Ok(report) => {
                self.symbols_processed += 1;
                self.reports.insert(symbol, report);
            }
            Err(err) => {
                self.symbol_errors += 1;
                self.errors.insert(symbol, err);
            }
        }
    }
}

/// Rolling window of tick durations.
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    capacity: usize,
    samples: VecDeque<f64>,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn record(&mut self, duration_ms: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(duration_ms);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// `sorted[floor(len * q)]`, clamped to the last sample. Zero when empty.
    pub fn percentile(&self, q: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let idx = ((sorted.len() as f64) * q).floor() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickStats {
    pub total_ticks: u64,
    pub avg_tick_ms: f64,
    pub p95_tick_ms: f64,
    pub p99_tick_ms: f64,
    pub total_coalesced_cancels: u64,
    pub total_coalesced_places: u64,
    pub total_flushes: u64,
}

// ============================================================================
// TickOrchestrator
// ============================================================================

pub struct TickOrchestrator {
    config: OrchestratorConfig,
    manager: Arc<OrderLifecycleManager>,
    generator: Arc<dyn IntentGenerator>,
    latencies: Mutex<LatencyWindow>,
    total_ticks: AtomicU64,
    coalesced_cancels: AtomicU64,
    coalesced_places: AtomicU64,
    flushes: AtomicU64,
}

impl TickOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        manager: Arc<OrderLifecycleManager>,
        generator: Arc<dyn IntentGenerator>,
    ) -> Self {
        Self {
            latencies: Mutex::new(LatencyWindow::new(config.latency_window)),
            config,
            manager,
            generator,
            total_ticks: AtomicU64::new(0),
            coalesced_cancels: AtomicU64::new(0),
            coalesced_places: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<OrderLifecycleManager> {
        &self.manager
    }

    /// Process one tick for `symbols`. Never fails; problems are counted.
    pub async fn process_tick(
        &self,
        symbols: &[String],
        snapshots: &HashMap<String, MarketSnapshot>,
    ) -> TickResult {
        let started = Instant::now();
        let tick_id = self.total_ticks.fetch_add(1, Ordering::AcqRel) + 1;
        self.manager.bus().begin_tick(tick_id);
        for snapshot in snapshots.values() {
            self.manager.on_market_snapshot(snapshot);
        }

        let mut result = if self.config.parallel_enabled {
            self.process_parallel(tick_id, symbols, snapshots).await
        } else {
            self.process_sequential(tick_id, symbols, snapshots).await
        };

        let duration_ms = started.elapsed().as_secs_f64() * 1_000.0;
        Metrics::tick_duration(duration_ms);
        {
            let mut latencies = self.latencies.lock();
            latencies.record(duration_ms);
            result.p95_ms = latencies.percentile(0.95);
            result.p99_ms = latencies.percentile(0.99);
        }
        result.duration_ms = duration_ms;

        if result.symbol_errors > 0 {
            warn!(
                tick_id,
                errors = result.symbol_errors,
                processed = result.symbols_processed,
                "Tick completed with symbol errors"
            );
        } else {
            debug!(
                tick_id,
                processed = result.symbols_processed,
                duration_ms,
                "Tick completed"
            );
        }
        result
    }

    async fn process_parallel(
        &self,
        tick_id: u64,
        symbols: &[String],
        snapshots: &HashMap<String, MarketSnapshot>,
    ) -> TickResult {
        let mut result = TickResult::new(tick_id, TickMode::Parallel);
        let work: Vec<(&String, &MarketSnapshot)> = symbols
            .iter()
            .filter_map(|s| snapshots.get(s).map(|snap| (s, snap)))
            .collect();
        result.symbols_skipped = symbols.len() - work.len();

        // The stream must not hold a closure over borrowed tuples, or the
        // tick future is not `Send`.
        let jobs: Vec<BoxFuture<'_, (String, Result<SymbolReport, String>)>> = work
            .into_iter()
            .map(|(symbol, snapshot)| {
                Box::pin(async move { (symbol.clone(), self.run_symbol(symbol, snapshot).await) })
                    as BoxFuture<'_, _>
            })
            .collect();
        let outcomes: Vec<(String, Result<SymbolReport, String>)> = stream::iter(jobs)
            .buffer_unordered(self.config.max_parallel.max(1))
            .collect()
            .await;
        for (symbol, outcome) in outcomes {
            result.record(symbol, outcome);
        }

        let batches = self.manager.bus().coalesce_and_drain();
        for (symbol, batches) in batches {
            self.count_coalesced(&batches);
            result
                .flush
                .merge(self.manager.apply_batches(&symbol, batches).await);
        }
        result.flushes = 1;
        self.flushes.fetch_add(1, Ordering::Relaxed);
        result
    }

    async fn process_sequential(
        &self,
        tick_id: u64,
        symbols: &[String],
        snapshots: &HashMap<String, MarketSnapshot>,
    ) -> TickResult {
        let mut result = TickResult::new(tick_id, TickMode::Sequential);
        for symbol in symbols {
            let Some(snapshot) = snapshots.get(symbol) else {
                result.symbols_skipped += 1;
                continue;
            };
            let outcome = self.run_symbol(symbol, snapshot).await;
            result.record(symbol.clone(), outcome);

            let batches = self.manager.bus().drain_symbol(symbol);
            self.count_coalesced(&batches);
            result
                .flush
                .merge(self.manager.apply_batches(symbol, batches).await);
            result.flushes += 1;
            self.flushes.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    fn count_coalesced(&self, batches: &[BatchCommand]) {
        for batch in batches {
            match batch {
                BatchCommand::BatchCancel { targets, .. } => {
                    self.coalesced_cancels
                        .fetch_add(targets.len() as u64, Ordering::Relaxed);
                }
                BatchCommand::BatchPlace { requests, .. } => {
                    self.coalesced_places
                        .fetch_add(requests.len() as u64, Ordering::Relaxed);
                }
                BatchCommand::Amend { .. } => {}
            }
        }
    }

    /// Generate and stage one symbol under the deadline, capturing panics.
    async fn run_symbol(
        &self,
        symbol: &str,
        snapshot: &MarketSnapshot,
    ) -> Result<SymbolReport, String> {
        let deadline = Duration::from_millis(self.config.tick_deadline_ms);
        let guarded = AssertUnwindSafe(self.generate_and_stage(symbol, snapshot)).catch_unwind();
        match tokio::time::timeout(deadline, guarded).await {
            Ok(Ok(Ok(report))) => Ok(report),
            Ok(Ok(Err(err))) => {
                Metrics::tick_symbol_error("error");
                warn!(symbol, "Intent generation failed: {err}");
                Err(err.to_string())
            }
            Ok(Err(panic)) => {
                Metrics::tick_symbol_error("panic");
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(symbol, "Intent generation panicked: {message}");
                Err(format!("panic: {message}"))
            }
            Err(_) => {
                Metrics::tick_symbol_error("timeout");
                warn!(symbol, deadline_ms = self.config.tick_deadline_ms, "Symbol missed tick deadline");
                Err(format!("deadline of {}ms exceeded", self.config.tick_deadline_ms))
            }
        }
    }

    async fn generate_and_stage(
        &self,
        symbol: &str,
        snapshot: &MarketSnapshot,
    ) -> OrderResult<SymbolReport> {
        let intents = self
            .generator
            .generate(symbol, snapshot, &self.manager)
            .await?;
        let mut report = SymbolReport {
            intents: intents.len(),
            ..Default::default()
        };
        for intent in intents {
            let staged = match intent {
                Intent::Place(params) => self.manager.stage_place(params).await.map(|_| ()),
                Intent::Cancel(id) => self.manager.stage_cancel(&id),
                Intent::Amend {
                    client_order_id,
                    price,
                    qty,
                } => self.manager.stage_amend(&client_order_id, price, qty),
            };
            match staged {
                Ok(()) => report.staged += 1,
                Err(err) => {
                    report.refused += 1;
                    debug!(symbol, "Intent refused: {err}");
                }
            }
        }
        Ok(report)
    }

    pub fn stats(&self) -> TickStats {
        let latencies = self.latencies.lock();
        TickStats {
            total_ticks: self.total_ticks.load(Ordering::Acquire),
            avg_tick_ms: latencies.average(),
            p95_tick_ms: latencies.percentile(0.95),
            p99_tick_ms: latencies.percentile(0.99),
            total_coalesced_cancels: self.coalesced_cancels.load(Ordering::Relaxed),
            total_coalesced_places: self.coalesced_places.load(Ordering::Relaxed),
            total_flushes: self.flushes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LifecycleConfig;
    use crate::error::OrderError;
    use crate::lifecycle::Collaborators;
    use quoter_core::{ManualClock, OrderSide};
    use quoter_gateway::{GatewayCall, PaperGateway};
    use quoter_risk::{ThrottleConfig, ThrottleGuard};
    use rust_decimal_macros::dec;

    /// Two bids per symbol; "BAD" fails, "PANIC" panics, "SLOW" sleeps.
    struct TwoBids;

    impl IntentGenerator for TwoBids {
        fn generate<'a>(
            &'a self,
            symbol: &'a str,
            snapshot: &'a MarketSnapshot,
            _manager: &'a OrderLifecycleManager,
        ) -> BoxFuture<'a, OrderResult<Vec<Intent>>> {
            Box::pin(async move {
                match symbol {
                    "BAD" => return Err(OrderError::InvalidRequest("no book".into())),
                    "PANIC" => panic!("generator bug"),
                    "SLOW" => tokio::time::sleep(Duration::from_secs(5)).await,
                    _ => {}
                }
                let bid = |offset| {
                    Intent::Place(PlaceParams::limit(
                        symbol,
                        OrderSide::Buy,
                        Size::new(dec!(1)),
                        Price::new(snapshot.mid.0 - offset),
                    ))
                };
                Ok(vec![bid(dec!(1)), bid(dec!(2))])
            })
        }
    }

    fn setup(config: OrchestratorConfig) -> (Arc<PaperGateway>, TickOrchestrator) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let paper = Arc::new(PaperGateway::with_clock(clock.clone()));
        let manager = OrderLifecycleManager::new(LifecycleConfig::default(), paper.clone(), clock)
            .with_collaborators(Collaborators {
                throttle: Arc::new(ThrottleGuard::new(ThrottleConfig {
                    max_creates_per_sec: 1_000,
                    ..Default::default()
                })),
                ..Default::default()
            });
        let orchestrator = TickOrchestrator::new(config, Arc::new(manager), Arc::new(TwoBids));
        (paper, orchestrator)
    }

    fn snapshots(symbols: &[&str]) -> HashMap<String, MarketSnapshot> {
        symbols
            .iter()
            .map(|s| {
                (
                    s.to_string(),
                    MarketSnapshot::from_mid(*s, Price::new(dec!(100)), 1_000_000),
                )
            })
            .collect()
    }

    fn names(symbols: &[&str]) -> Vec<String> {
        symbols.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_latency_percentiles() {
        let mut window = LatencyWindow::new(1_000);
        assert_eq!(window.percentile(0.95), 0.0);
        for i in 1..=100 {
            window.record(i as f64);
        }
        assert_eq!(window.percentile(0.95), 96.0);
        assert_eq!(window.percentile(0.99), 100.0);
        assert_eq!(window.average(), 50.5);
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let mut window = LatencyWindow::new(3);
        for v in [1.0, 2.0, 3.0, 10.0] {
            window.record(v);
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.average(), 5.0);
    }

    #[tokio::test]
    async fn test_parallel_isolates_failures_and_flushes_once() {
        let (paper, orchestrator) = setup(OrchestratorConfig::default());
        let symbols = names(&["AAA", "BAD", "PANIC", "BBB", "NOSNAP"]);
        let result = orchestrator
            .process_tick(&symbols, &snapshots(&["AAA", "BAD", "PANIC", "BBB"]))
            .await;

        assert_eq!(result.mode, TickMode::Parallel);
        assert_eq!(result.symbols_processed, 2);
        assert_eq!(result.symbol_errors, 2);
        assert_eq!(result.symbols_skipped, 1);
        assert!(result.errors["PANIC"].contains("generator bug"));
        assert_eq!(result.flushes, 1);
        assert_eq!(result.flush.success, 4);
        assert_eq!(
            paper.count_calls(|c| matches!(c, GatewayCall::BatchPlace { .. })),
            2
        );
        assert_eq!(orchestrator.stats().total_coalesced_places, 4);
    }

    #[tokio::test]
    async fn test_tick_runs_on_spawned_task() {
        let (paper, orchestrator) = setup(OrchestratorConfig::default());
        let orchestrator = Arc::new(orchestrator);
        let symbols = names(&["AAA", "BBB", "CCC"]);
        let snaps = snapshots(&["AAA", "BBB", "CCC"]);

        let task = Arc::clone(&orchestrator);
        let result = tokio::spawn(async move { task.process_tick(&symbols, &snaps).await })
            .await
            .unwrap();

        assert_eq!(result.mode, TickMode::Parallel);
        assert_eq!(result.symbols_processed, 3);
        assert_eq!(result.flushes, 1);
        assert_eq!(paper.active_count(), 6);
    }

    #[tokio::test]
    async fn test_deadline_reports_timeout() {
        let (_, orchestrator) = setup(OrchestratorConfig {
            tick_deadline_ms: 20,
            ..Default::default()
        });
        let result = orchestrator
            .process_tick(&names(&["SLOW", "AAA"]), &snapshots(&["SLOW", "AAA"]))
            .await;
        assert_eq!(result.symbols_processed, 1);
        assert!(result.errors["SLOW"].contains("deadline"));
    }

    #[tokio::test]
    async fn test_sequential_flushes_per_symbol() {
        let (paper, orchestrator) = setup(OrchestratorConfig {
            parallel_enabled: false,
            ..Default::default()
        });
        let result = orchestrator
            .process_tick(&names(&["AAA", "BAD", "BBB"]), &snapshots(&["AAA", "BAD", "BBB"]))
            .await;

        assert_eq!(result.mode, TickMode::Sequential);
        assert_eq!(result.symbols_processed, 2);
        assert_eq!(result.symbol_errors, 1);
        assert_eq!(result.flushes, 3);
        assert_eq!(paper.active_count(), 4);
        assert_eq!(orchestrator.stats().total_ticks, 1);
    }
}
