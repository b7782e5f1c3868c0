//! Main application orchestration.
//!
//! Coordinates all components:
//! - Paper venue (optionally behind chaos injection), wrapped in retries
//! - Order lifecycle manager with its admission collaborators
//! - Tick loop: paper market step, crossed-order fills, tick orchestration
//! - Reconciliation loop and anti-stale sweep loop
//! - Snapshot restore on start, cancel-all and snapshot save on shutdown

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use quoter_core::{InstrumentRegistry, InstrumentSpec, PortfolioTargets, SharedClock, SystemClock};
use quoter_executor::{
    run_periodic, spawn_stale_sweep, Collaborators, CommandBus, LoopConfig, LoopStats,
    OrderLifecycleManager, TickOrchestrator,
};
use quoter_gateway::{ChaosGateway, DynGateway, OrderSnapshot, PaperGateway, RetryingGateway};
use quoter_reconcile::ReconciliationEngine;
use quoter_risk::{CircuitBreaker, QuotingPause, RuntimeGuard, SchedulerSet, ThrottleGuard};

use crate::config::AppConfig;
use crate::error::AppResult;
use crate::ladder::LadderGenerator;
use crate::paper_market::PaperMarket;

/// Ticks between orchestrator stats log lines.
const STATS_EVERY_TICKS: u64 = 60;

/// Main application.
pub struct Application {
    config: AppConfig,
    clock: SharedClock,
    paper: Arc<PaperGateway>,
    market: Arc<PaperMarket>,
    manager: Arc<OrderLifecycleManager>,
    reconciler: Arc<ReconciliationEngine>,
    orchestrator: Arc<TickOrchestrator>,
}

impl Application {
    /// Build every component from a validated configuration.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;
        let clock = SystemClock::shared();

        let paper = Arc::new(PaperGateway::with_clock(Arc::clone(&clock)));
        let mut gateway: DynGateway = paper.clone();
        if config.chaos.enabled {
            warn!(chaos = ?config.chaos, "Chaos injection enabled");
            gateway = Arc::new(ChaosGateway::new(gateway, config.chaos.clone()));
        }
        let gateway: DynGateway = Arc::new(RetryingGateway::new(gateway, config.retry.clone()));

        let instruments = Arc::new(InstrumentRegistry::new(InstrumentSpec::new(
            config.lifecycle.default_tick_size,
            config.lifecycle.default_lot_size,
        )));
        for s in &config.symbols {
            instruments.insert(&s.symbol, InstrumentSpec::new(s.tick_size, s.lot_size));
        }

        let risk = Collaborators {
            throttle: Arc::new(ThrottleGuard::new(config.throttle.clone())),
            guard: Arc::new(RuntimeGuard::new(config.guard.clone())),
            scheduler: Arc::new(SchedulerSet::from_config(&config.scheduler)?),
            circuit: config
                .circuit
                .clone()
                .map(|c| Arc::new(CircuitBreaker::new(c))),
            pause: Arc::new(QuotingPause::new()),
        };

        let manager = OrderLifecycleManager::new(config.lifecycle.clone(), gateway, Arc::clone(&clock))
            .with_collaborators(risk)
            .with_rollout(&config.rollout)
            .with_instruments(instruments)
            .with_targets(Arc::new(PortfolioTargets::new(config.targets())))
            .with_bus(Arc::new(CommandBus::new(config.bus.clone())));
        manager.set_overrides(config.overrides.clone());
        let manager = Arc::new(manager);

        let reconciler = Arc::new(ReconciliationEngine::new(
            Arc::clone(&manager),
            config.reconcile.clone(),
        ));
        let orchestrator = Arc::new(TickOrchestrator::new(
            config.orchestrator.clone(),
            Arc::clone(&manager),
            Arc::new(LadderGenerator::new(config.ladder.clone())),
        ));
        let market = Arc::new(PaperMarket::new(
            config.paper.clone(),
            paper.clone(),
            &config.symbols,
        ));

        Ok(Self {
            config,
            clock,
            paper,
            market,
            manager,
            reconciler,
            orchestrator,
        })
    }

    pub fn manager(&self) -> &Arc<OrderLifecycleManager> {
        &self.manager
    }

    /// Load the saved order table. The paper venue starts empty, so
    /// restored orders are put back on it; otherwise the first
    /// reconciliation would close them as missing.
    pub fn restore(&self) -> AppResult<usize> {
        let restored = self
            .manager
            .load_snapshot(Path::new(&self.config.snapshot_path))?;
        for order in self.manager.active_orders(None) {
            self.paper.insert_remote(OrderSnapshot {
                order_id: order.order_id.clone(),
                client_order_id: order.client_order_id.clone(),
                symbol: order.symbol.clone(),
                side: order.side,
                price: order.price,
                qty: order.qty(),
                filled_qty: order.filled_qty(),
                remaining_qty: order.remaining_qty(),
                status: order.status,
                created_ms: order.created_ms,
                updated_ms: order.last_update_ms,
            });
        }
        Ok(restored)
    }

    fn spawn_tick_loop(&self, shutdown: CancellationToken) -> JoinHandle<LoopStats> {
        let interval = Duration::from_millis(self.config.orchestrator.tick_interval_ms);
        let config = LoopConfig::new("tick", interval, interval);
        let symbols = self.config.symbol_names();
        let clock = Arc::clone(&self.clock);
        let market = Arc::clone(&self.market);
        let manager = Arc::clone(&self.manager);
        let orchestrator = Arc::clone(&self.orchestrator);

        tokio::spawn(run_periodic(config, Arc::clone(&clock), shutdown, move || {
            let symbols = symbols.clone();
            let clock = Arc::clone(&clock);
            let market = Arc::clone(&market);
            let manager = Arc::clone(&manager);
            let orchestrator = Arc::clone(&orchestrator);
            async move {
                let snapshots = market.step(clock.now_ms());
                market.match_crossed(&manager);
                let result = orchestrator.process_tick(&symbols, &snapshots).await;
                if result.tick_id % STATS_EVERY_TICKS == 0 {
                    let stats = orchestrator.stats();
                    info!(
                        total_ticks = stats.total_ticks,
                        avg_ms = stats.avg_tick_ms,
                        p95_ms = stats.p95_tick_ms,
                        p99_ms = stats.p99_tick_ms,
                        coalesced_cancels = stats.total_coalesced_cancels,
                        coalesced_places = stats.total_coalesced_places,
                        active = manager.active_orders(None).len(),
                        "Tick stats"
                    );
                }
                if result.symbols_processed == 0 && result.symbol_errors > 0 {
                    return Err(format!("all {} symbols failed", result.symbol_errors));
                }
                Ok(())
            }
        }))
    }

    /// Run until ctrl-c, then cancel all orders and save the table.
    pub async fn run(self) -> AppResult<()> {
        self.restore()?;
        info!(
            symbols = ?self.config.symbol_names(),
            shadow = self.manager.is_shadow(),
            parallel = self.config.orchestrator.parallel_enabled,
            "Starting application"
        );

        let shutdown = CancellationToken::new();
        let loops = [
            ("tick", self.spawn_tick_loop(shutdown.child_token())),
            (
                "stale_sweep",
                spawn_stale_sweep(Arc::clone(&self.manager), shutdown.child_token()),
            ),
            (
                "reconcile",
                Arc::clone(&self.reconciler).spawn(shutdown.child_token()),
            ),
        ];

        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received");
        shutdown.cancel();

        for (name, handle) in loops {
            match handle.await {
                Ok(stats) => info!(name, iterations = stats.iterations, errors = stats.errors, "Loop joined"),
                Err(err) => warn!(name, "Loop task failed: {err}"),
            }
        }

        let cancelled = self.manager.cancel_all(None).await;
        let saved = self
            .manager
            .save_snapshot(Path::new(&self.config.snapshot_path))?;
        info!(cancelled, saved, "Shutdown complete");
        Ok(())
    }
}
